use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{DictionaryConfig, DictionarySourceType};
use crate::error::{DictionaryError, Result as AppResult};

/// Word list lookup used to validate submitted moves.
#[async_trait]
pub trait WordValidator: Send + Sync {
    async fn contains(&self, word: &str) -> bool;
}

pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Newline separated list, one word per line.
pub fn parse_word_list(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(normalize_word)
        .filter(|line| !line.is_empty())
        .collect()
}

#[tracing::instrument(skip(config), fields(
    dictionary.source_type = ?config.source_type,
    dictionary.file_path = ?config.file_path,
    dictionary.http_url = ?config.http_url
))]
async fn load_words(config: &DictionaryConfig) -> Result<HashSet<String>, DictionaryError> {
    let words = match config.source_type {
        DictionarySourceType::File => {
            let file_path = config.file_path.as_ref().ok_or_else(|| {
                DictionaryError::Config("File path required for file source".to_string())
            })?;
            tracing::debug!(file.path = %file_path, "Loading dictionary from file");
            let content = tokio::fs::read_to_string(file_path)
                .await
                .map_err(|e| DictionaryError::FileRead {
                    path: file_path.clone(),
                    source: e,
                })?;
            parse_word_list(&content)
        }
        DictionarySourceType::Http => {
            let url = config.http_url.as_ref().ok_or_else(|| {
                DictionaryError::Config("HTTP URL required for http source".to_string())
            })?;
            tracing::debug!(http.url = %url, "Fetching dictionary from URL");
            let fetch_error = |e: reqwest::Error| DictionaryError::HttpFetch {
                url: url.clone(),
                source: e,
            };
            let content = reqwest::get(url)
                .await
                .and_then(|response| response.error_for_status())
                .map_err(fetch_error)?
                .text()
                .await
                .map_err(fetch_error)?;
            parse_word_list(&content)
        }
        DictionarySourceType::Inline => config
            .words
            .iter()
            .map(|word| normalize_word(word))
            .filter(|word| !word.is_empty())
            .collect(),
    };

    if words.is_empty() {
        return Err(DictionaryError::Empty);
    }
    Ok(words)
}

pub struct Dictionary {
    words: RwLock<Arc<HashSet<String>>>,
    config: DictionaryConfig,
}

impl Dictionary {
    pub async fn new(config: DictionaryConfig) -> AppResult<Self> {
        let words = load_words(&config).await.map_err(|err| {
            tracing::error!(error = %err, "Failed to load dictionary");
            err
        })?;
        tracing::info!(words.count = words.len(), "Dictionary loaded");
        Ok(Self {
            words: RwLock::new(Arc::new(words)),
            config,
        })
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|word| normalize_word(word.as_ref()))
            .filter(|word| !word.is_empty())
            .collect();
        Self {
            words: RwLock::new(Arc::new(words)),
            config: DictionaryConfig::default(),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> AppResult<usize> {
        let words = load_words(&self.config).await?;
        let count = words.len();
        *self.words.write().await = Arc::new(words);
        tracing::info!(words.count = count, "Dictionary refreshed");
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.words.read().await.len()
    }
}

#[async_trait]
impl WordValidator for Dictionary {
    async fn contains(&self, word: &str) -> bool {
        self.words.read().await.contains(&normalize_word(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_word_list_trimming_and_lowercasing() {
        let words = parse_word_list("Aardvark\n  tiger \n\nELEPHANT\r\n");
        assert_eq!(words.len(), 3);
        assert!(words.contains("aardvark"));
        assert!(words.contains("tiger"));
        assert!(words.contains("elephant"));
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let dictionary = Dictionary::from_words(["Tiger", "eel"]);
        assert!(dictionary.contains("TIGER").await);
        assert!(dictionary.contains("  eel ").await);
        assert!(!dictionary.contains("unicorn").await);
        assert_eq!(dictionary.len().await, 2);
    }

    #[tokio::test]
    async fn inline_source_loads_and_refreshes() {
        let config = DictionaryConfig {
            source_type: DictionarySourceType::Inline,
            words: vec!["Lion".to_string(), "  ".to_string()],
            ..DictionaryConfig::default()
        };
        let dictionary = Dictionary::new(config).await.unwrap();
        assert!(dictionary.contains("lion").await);
        assert_eq!(dictionary.refresh().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_source_without_path_is_a_config_error() {
        let config = DictionaryConfig {
            source_type: DictionarySourceType::File,
            file_path: None,
            ..DictionaryConfig::default()
        };
        assert!(matches!(
            load_words(&config).await,
            Err(DictionaryError::Config(_))
        ));
    }

    async fn serve_word_list(status: axum::http::StatusCode, body: &'static str) -> String {
        let app = axum::Router::new().route(
            "/words.txt",
            axum::routing::get(move || async move { (status, body) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/words.txt", addr)
    }

    fn http_source(url: String) -> DictionaryConfig {
        DictionaryConfig {
            source_type: DictionarySourceType::Http,
            http_url: Some(url),
            ..DictionaryConfig::default()
        }
    }

    #[tokio::test]
    async fn http_source_loads_word_list() {
        let url = serve_word_list(axum::http::StatusCode::OK, "Zebra\nyak\n").await;
        let words = load_words(&http_source(url)).await.unwrap();
        assert_eq!(words.len(), 2);
        assert!(words.contains("zebra"));
    }

    #[tokio::test]
    async fn http_error_status_is_not_a_word_list() {
        let url = serve_word_list(axum::http::StatusCode::NOT_FOUND, "Not Found\nerror page").await;
        assert!(matches!(
            load_words(&http_source(url)).await,
            Err(DictionaryError::HttpFetch { .. })
        ));
    }

    #[tokio::test]
    async fn empty_inline_list_is_rejected() {
        let config = DictionaryConfig {
            source_type: DictionarySourceType::Inline,
            words: Vec::new(),
            ..DictionaryConfig::default()
        };
        assert!(matches!(
            load_words(&config).await,
            Err(DictionaryError::Empty)
        ));
    }
}
