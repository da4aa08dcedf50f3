use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Enables the dictionary refresh endpoint when set.
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DictionarySourceType {
    File,
    Http,
    #[default]
    Inline,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DictionaryConfig {
    #[serde(default)]
    pub source_type: DictionarySourceType,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub words: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameSettings {
    /// When false a dropped connection keeps its seat until an explicit leave.
    pub remove_on_disconnect: bool,
    pub disconnect_grace_seconds: u64,
    pub reassign_host: bool,
    /// Server-side turn deadline. Unset leaves timing to the clients.
    #[serde(default)]
    pub turn_timeout_seconds: Option<u64>,
    pub max_players: usize,
    pub max_update_retries: usize,
    /// Rooms with no seats, or no seat holding a live connection, are
    /// deleted after this long. Zero keeps them forever.
    pub idle_room_ttl_seconds: u64,
    pub room_sweep_interval_seconds: u64,
}

impl GameSettings {
    pub fn disconnect_grace(&self) -> Option<Duration> {
        self.remove_on_disconnect
            .then(|| Duration::from_secs(self.disconnect_grace_seconds))
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn idle_room_ttl(&self) -> Option<Duration> {
        (self.idle_room_ttl_seconds > 0).then(|| Duration::from_secs(self.idle_room_ttl_seconds))
    }

    pub fn room_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.room_sweep_interval_seconds.max(1))
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            remove_on_disconnect: true,
            disconnect_grace_seconds: 30,
            reassign_host: true,
            turn_timeout_seconds: None,
            max_players: 8,
            max_update_retries: 8,
            idle_room_ttl_seconds: 600,
            room_sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub dictionary: DictionaryConfig,
    pub game: GameSettings,
}

pub fn load_settings() -> AppResult<AppSettings> {
    let defaults = GameSettings::default();
    let builder = Config::builder()
        .set_default("server.port", 5000)
        .and_then(|b| b.set_default("dictionary.source_type", "file"))
        .and_then(|b| b.set_default("dictionary.file_path", "animals.txt"))
        .and_then(|b| b.set_default("game.remove_on_disconnect", defaults.remove_on_disconnect))
        .and_then(|b| {
            b.set_default(
                "game.disconnect_grace_seconds",
                defaults.disconnect_grace_seconds,
            )
        })
        .and_then(|b| b.set_default("game.reassign_host", defaults.reassign_host))
        .and_then(|b| b.set_default("game.max_players", defaults.max_players as u64))
        .and_then(|b| {
            b.set_default(
                "game.max_update_retries",
                defaults.max_update_retries as u64,
            )
        })
        .and_then(|b| b.set_default("game.idle_room_ttl_seconds", defaults.idle_room_ttl_seconds))
        .and_then(|b| {
            b.set_default(
                "game.room_sweep_interval_seconds",
                defaults.room_sweep_interval_seconds,
            )
        })
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("WORDCHAIN")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .with_list_parse_key("dictionary.words")
                .try_parsing(true),
        );

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &AppSettings) -> Result<(), ConfigError> {
    if settings.game.max_players < crate::game::MIN_PLAYERS_TO_START {
        return Err(ConfigError::InvalidValue(format!(
            "game.max_players must be at least {}",
            crate::game::MIN_PLAYERS_TO_START
        )));
    }
    if settings.game.max_update_retries == 0 {
        return Err(ConfigError::InvalidValue(
            "game.max_update_retries must be positive".to_string(),
        ));
    }
    match settings.dictionary.source_type {
        DictionarySourceType::File if settings.dictionary.file_path.is_none() => Err(
            ConfigError::Missing("dictionary.file_path".to_string()),
        ),
        DictionarySourceType::Http if settings.dictionary.http_url.is_none() => {
            Err(ConfigError::Missing("dictionary.http_url".to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(game: GameSettings, dictionary: DictionaryConfig) -> AppSettings {
        AppSettings {
            server: ServerConfig {
                port: 0,
                cors_origins: Vec::new(),
                admin_api_key: None,
            },
            dictionary,
            game,
        }
    }

    #[test]
    fn disconnect_grace_disabled_when_seats_are_kept() {
        let game = GameSettings {
            remove_on_disconnect: false,
            ..GameSettings::default()
        };
        assert!(game.disconnect_grace().is_none());
        assert_eq!(
            GameSettings::default().disconnect_grace(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn zero_turn_timeout_means_no_server_timer() {
        let game = GameSettings {
            turn_timeout_seconds: Some(0),
            ..GameSettings::default()
        };
        assert!(game.turn_timeout().is_none());
    }

    #[test]
    fn zero_idle_ttl_keeps_rooms() {
        let game = GameSettings {
            idle_room_ttl_seconds: 0,
            room_sweep_interval_seconds: 0,
            ..GameSettings::default()
        };
        assert!(game.idle_room_ttl().is_none());
        assert_eq!(game.room_sweep_interval(), Duration::from_secs(1));
        assert_eq!(
            GameSettings::default().idle_room_ttl(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn http_source_requires_url() {
        let settings = settings_with(
            GameSettings::default(),
            DictionaryConfig {
                source_type: DictionarySourceType::Http,
                ..DictionaryConfig::default()
            },
        );
        assert!(matches!(validate(&settings), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn single_seat_rooms_are_rejected() {
        let settings = settings_with(
            GameSettings {
                max_players: 1,
                ..GameSettings::default()
            },
            DictionaryConfig::default(),
        );
        assert!(matches!(
            validate(&settings),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
