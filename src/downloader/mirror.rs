use super::capture::{INITIAL_CAPACITY, ResponseCapture};
use crate::error::{Error, Result};

/// Endless round-robin over the mirrors, starting at the worker's own slot.
pub struct MirrorUrls<'a> {
    mirrors: &'a [String],
    image: u32,
    worker_id: usize,
    cur: usize,
}

impl<'a> MirrorUrls<'a> {
    pub fn new(mirrors: &'a [String], image: u32, worker_id: usize) -> Self {
        Self {
            mirrors,
            image,
            worker_id,
            cur: 0,
        }
    }
}

impl Iterator for MirrorUrls<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.mirrors.is_empty() {
            return None;
        }
        let offset = (self.worker_id + self.cur) % self.mirrors.len();
        self.cur += 1;
        Some(image_url(&self.mirrors[offset], self.image))
    }
}

fn image_url(mirror: &str, image: u32) -> String {
    let sep = if mirror.contains('?') { '&' } else { '?' };
    format!("{}{}img={}", mirror, sep, image)
}

/// Issue one GET and capture the marker header and the full body.
pub async fn fetch_fragment(
    client: &reqwest::Client,
    url: &str,
    marker: &str,
) -> Result<ResponseCapture> {
    let mut response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status,
        });
    }

    let mut capture = ResponseCapture::new(INITIAL_CAPACITY, marker)?;
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            capture.header_line(&format!("{}: {}", name, value));
        }
    }

    while let Some(bytes) = response.chunk().await? {
        capture.append(&bytes)?;
    }
    Ok(capture)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirrors() -> Vec<String> {
        vec![
            "http://m1/image".to_string(),
            "http://m2/image".to_string(),
            "http://m3/image".to_string(),
        ]
    }

    #[test]
    fn test_rotation_starts_at_worker_slot() {
        let mirrors = mirrors();
        let urls: Vec<_> = MirrorUrls::new(&mirrors, 4, 1).take(4).collect();
        assert_eq!(
            urls,
            vec![
                "http://m2/image?img=4",
                "http://m3/image?img=4",
                "http://m1/image?img=4",
                "http://m2/image?img=4",
            ]
        );
    }

    #[test]
    fn test_rotation_wraps_large_worker_ids() {
        let mirrors = mirrors();
        let first = MirrorUrls::new(&mirrors, 1, 5).next().unwrap();
        assert_eq!(first, "http://m3/image?img=1");
    }

    #[test]
    fn test_no_mirrors() {
        let mirrors: Vec<String> = vec![];
        assert!(MirrorUrls::new(&mirrors, 1, 0).next().is_none());
    }

    #[test]
    fn test_existing_query_is_extended() {
        assert_eq!(
            image_url("http://m/image?part=a", 2),
            "http://m/image?part=a&img=2"
        );
    }
}
