use std::future::Future;
use std::iter::repeat;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bson::spec::BinarySubtype;
use bson::Bson;
use uuid::Uuid;

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(it))
}

/// UUID as the BSON binary the serde helpers produce, for use in raw
/// filter/update documents.
pub fn uuid_binary(id: Uuid) -> Bson {
    Bson::Binary(bson::Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.as_bytes().to_vec(),
    })
}

/// Retry a transient-failure-prone call up to `attempts` times with linear
/// backoff. Only read paths use this; guarded writes must not be replayed.
pub async fn with_retries<T, E, F, Fut>(attempts: u32, base_delay: Duration, op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut tried = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tried += 1;
                if tried >= attempts.max(1) {
                    return Err(e);
                }
                tracing::warn!("retrying after transient failure ({}/{}): {}", tried, attempts, e);
                tokio::time::sleep(base_delay * tried).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn uuid_binary_matches_serde_helper_output() {
        #[derive(serde::Serialize)]
        struct Probe {
            #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
            id: Uuid,
        }

        let id = Uuid::new_v4();
        let doc = bson::to_document(&Probe { id }).unwrap();
        assert_eq!(doc.get("id"), Some(&uuid_binary(id)));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_retries(2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still down") }
        })
        .await;

        assert_eq!(result, Err("still down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
