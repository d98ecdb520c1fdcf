//! Utility functions for socialgraph

use std::future::Future;
use std::time::Duration;

/// Calculate CRC32 checksum
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Run `fut` with a deadline, folding expiry into `Error::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(crate::Error::Timeout(format!(
            "{} exceeded {}ms",
            what,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_stable() {
        assert_eq!(crc32(b"edge"), crc32(b"edge"));
        assert_ne!(crc32(b"edge"), crc32(b"edgf"));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let res: crate::Result<()> = with_timeout(Duration::from_millis(10), "sleep", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(crate::Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result() {
        let res = with_timeout(Duration::from_secs(1), "ready", async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
