//! Configuration module - environment variable parsing and tuning tables

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma separated, `*` for any)
    pub client_origin: String,
    /// Seed for spread and spawn selection; random when unset
    pub seed: Option<u64>,

    pub combat: CombatSettings,
    pub game: MatchSettings,
    pub weapons: Vec<WeaponConfig>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render-style PORT wins over SERVER_ADDR
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let seed = match env::var("SIMULATION_SEED") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "SIMULATION_SEED",
                value: raw,
            })?),
            Err(_) => None,
        };

        let weapons = match env::var("WEAPONS_FILE") {
            Ok(path) => load_weapon_catalogue(PathBuf::from(path))?,
            Err(_) => default_weapon_catalogue(),
        };

        let defaults = CombatSettings::default();
        let combat = CombatSettings {
            allow_friendly_fire: env_or("ALLOW_FRIENDLY_FIRE", defaults.allow_friendly_fire)?,
            friendly_fire_damage_mult: env_or(
                "FRIENDLY_FIRE_DAMAGE_MULT",
                defaults.friendly_fire_damage_mult,
            )?,
            respawn_time: env_or("RESPAWN_TIME", defaults.respawn_time)?,
            weapon_reset_time: env_or("WEAPON_RESET_TIME", defaults.weapon_reset_time)?,
            max_health: env_or("MAX_HEALTH", defaults.max_health)?,
            ..defaults
        };

        let defaults = MatchSettings::default();
        let game = MatchSettings {
            score_to_win: env_or("SCORE_TO_WIN", defaults.score_to_win)?,
            score_per_flag: env_or("SCORE_PER_FLAG", defaults.score_per_flag)?,
            flag_reset_time: env_or("FLAG_RESET_TIME", defaults.flag_reset_time)?,
            game_length: env_or("GAME_LENGTH", defaults.game_length)?,
            end_game_delay: env_or("END_GAME_DELAY", defaults.end_game_delay)?,
            num_teams: env_or("NUM_TEAMS", defaults.num_teams)?,
            max_players: env_or("MAX_PLAYERS", defaults.max_players)?,
            ..defaults
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            seed,
            combat: combat.sanitized(),
            game: game.sanitized(),
            weapons: weapons.into_iter().map(WeaponConfig::sanitized).collect(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            seed: None,
            combat: CombatSettings::default(),
            game: MatchSettings::default(),
            weapons: default_weapon_catalogue(),
        }
    }
}

/// Read an optional variable, falling back to `default` when unset
fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn load_weapon_catalogue(path: PathBuf) -> Result<Vec<WeaponConfig>, ConfigError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let weapons: Vec<WeaponConfig> = serde_json::from_str(&raw)?;
    if weapons.is_empty() {
        return Err(ConfigError::EmptyCatalogue(path));
    }
    Ok(weapons)
}

/// Combat-wide settings shared by every weapon and actor
#[derive(Clone, Debug)]
pub struct CombatSettings {
    /// If enabled, players on the same team can damage each other
    pub allow_friendly_fire: bool,
    /// Damage modifier against friendly targets
    pub friendly_fire_damage_mult: f32,
    pub respawn_time: f32,
    /// How long a weapon must be unheld before it returns to its rack.
    /// 0 = instant, negative = never
    pub weapon_reset_time: f32,
    pub max_health: f32,
    /// Radius of an actor's hit volume
    pub hit_radius: f32,
    /// Height of an actor's hit volume above its feet
    pub hit_height: f32,
    /// Max distance between an actor and a pickup it grabs
    pub pickup_proximity: f32,
}

impl CombatSettings {
    /// Multiplier applied to same-team hits; zero when friendly fire is off
    pub fn friendly_fire_mult(&self) -> f32 {
        if self.allow_friendly_fire {
            self.friendly_fire_damage_mult
        } else {
            0.0
        }
    }

    fn sanitized(mut self) -> Self {
        if self.max_health <= 0.0 {
            warn!(max_health = self.max_health, "Non-positive max health, using 100");
            self.max_health = 100.0;
        }
        if self.respawn_time < 0.0 {
            warn!(respawn_time = self.respawn_time, "Negative respawn time, using 0");
            self.respawn_time = 0.0;
        }
        if self.friendly_fire_damage_mult < 0.0 {
            warn!("Negative friendly fire multiplier, using 0");
            self.friendly_fire_damage_mult = 0.0;
        }
        self
    }
}

impl Default for CombatSettings {
    fn default() -> Self {
        Self {
            allow_friendly_fire: false,
            friendly_fire_damage_mult: 1.0,
            respawn_time: 3.0,
            weapon_reset_time: 10.0,
            max_health: 100.0,
            hit_radius: 0.35,
            hit_height: 1.7,
            pickup_proximity: 2.0,
        }
    }
}

/// Capture-the-flag rules
#[derive(Clone, Debug)]
pub struct MatchSettings {
    pub score_to_win: u32,
    pub score_per_flag: u32,
    /// Seconds a dropped flag waits before returning to its stand
    pub flag_reset_time: f32,
    /// Match length in seconds
    pub game_length: f32,
    /// Seconds the result is shown before control returns to the lobby
    pub end_game_delay: f32,
    pub num_teams: usize,
    pub max_players: usize,
    pub team_names: Vec<String>,
}

impl MatchSettings {
    pub fn team_name(&self, team: usize) -> String {
        self.team_names
            .get(team)
            .cloned()
            .unwrap_or_else(|| format!("TEAM {}", team + 1))
    }

    fn sanitized(mut self) -> Self {
        if self.num_teams < 2 {
            warn!(num_teams = self.num_teams, "Capture the flag needs two teams, using 2");
            self.num_teams = 2;
        }
        if self.score_to_win == 0 {
            warn!("Score to win of 0, using 1");
            self.score_to_win = 1;
        }
        if self.max_players == 0 {
            self.max_players = 1;
        }
        self
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            score_to_win: 3,
            score_per_flag: 1,
            flag_reset_time: 5.0,
            game_length: 5.0 * 60.0,
            end_game_delay: 5.0,
            num_teams: 2,
            max_players: 16,
            team_names: vec!["BLUE".to_string(), "RED".to_string()],
        }
    }
}

/// Static tuning of a weapon model
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeaponConfig {
    pub name: String,
    /// How many copies of this weapon sit on the racks
    pub copies: u32,

    // Damage
    /// Fires as long as the trigger is held
    pub is_automatic: bool,
    pub projectile_damage: f32,
    pub magazine_size: u32,
    /// Time between rounds in seconds = 60 / rounds_per_min
    pub rounds_per_min: u32,

    // Projectile
    /// Resolve hits with a ray instead of a flying projectile
    pub is_hitscan: bool,
    pub hitscan_range: f32,
    /// Recycle the projectile when it strikes level geometry
    pub destroy_on_enter: bool,
    /// 1 = normal gravity, 0 = none, -1 = inverted
    pub projectile_gravity: f32,
    pub projectile_lifespan: f32,
    pub muzzle_velocity: f32,
    pub pellet_count: u32,

    // Reload
    /// Each shot must be rechambered; disables automatic fire
    pub rechamber_each_shot: bool,
    /// Also added on top of the reload when the magazine ran dry
    pub rechamber_time: f32,
    pub reload_time: f32,

    // Accuracy, all angles in degrees
    pub min_bloom: f32,
    pub max_bloom: f32,
    pub bloom_per_shot: f32,
    /// Degrees per second
    pub bloom_decay_rate: f32,
    pub bloom_decay_delay: f32,
    pub dual_wield_bloom_penalty: f32,
    pub dual_wield_min_bloom_penalty: f32,

    /// If false, picking this weapon up drops whatever is in the other hand
    pub allow_dual_wielding: bool,
}

impl WeaponConfig {
    /// Clamp values that would stall or break the fire loop
    pub fn sanitized(mut self) -> Self {
        if self.rechamber_each_shot {
            self.is_automatic = false;
        }
        if self.reload_time <= 0.0 {
            warn!(weapon = %self.name, reload_time = self.reload_time, "Non-positive reload time, clamping");
            self.reload_time = 0.001;
        }
        if self.magazine_size == 0 {
            warn!(weapon = %self.name, "Magazine size of 0, using 1");
            self.magazine_size = 1;
        }
        if self.rounds_per_min == 0 {
            warn!(weapon = %self.name, "Rate of fire of 0, using 1 rpm");
            self.rounds_per_min = 1;
        }
        if self.pellet_count == 0 {
            warn!(weapon = %self.name, "Pellet count must be at least one");
            self.pellet_count = 1;
        }
        if self.min_bloom > self.max_bloom {
            warn!(weapon = %self.name, "Min bloom above max bloom, swapping");
            std::mem::swap(&mut self.min_bloom, &mut self.max_bloom);
        }
        self.min_bloom = self.min_bloom.max(0.0);
        self.max_bloom = self.max_bloom.max(self.min_bloom);
        self.rechamber_time = self.rechamber_time.max(0.0);
        self.bloom_decay_rate = self.bloom_decay_rate.max(0.0);
        self
    }

    /// Seconds between rounds
    pub fn refire_interval(&self) -> f32 {
        60.0 / self.rounds_per_min as f32
    }
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            name: "default_weapon".to_string(),
            copies: 1,
            is_automatic: false,
            projectile_damage: 1.0,
            magazine_size: 6,
            rounds_per_min: 300,
            is_hitscan: false,
            hitscan_range: 200.0,
            destroy_on_enter: true,
            projectile_gravity: 1.0,
            projectile_lifespan: 10.0,
            muzzle_velocity: 60.0,
            pellet_count: 1,
            rechamber_each_shot: false,
            rechamber_time: 0.0,
            reload_time: 1.5,
            min_bloom: 0.0,
            max_bloom: 1.0,
            bloom_per_shot: 0.0,
            bloom_decay_rate: 1.0,
            bloom_decay_delay: 0.0,
            dual_wield_bloom_penalty: 2.0,
            dual_wield_min_bloom_penalty: 2.0,
            allow_dual_wielding: false,
        }
    }
}

/// Weapons placed when no catalogue file is configured
pub fn default_weapon_catalogue() -> Vec<WeaponConfig> {
    vec![
        WeaponConfig {
            name: "pistol".to_string(),
            copies: 4,
            projectile_damage: 20.0,
            magazine_size: 12,
            rounds_per_min: 400,
            muzzle_velocity: 80.0,
            reload_time: 1.2,
            max_bloom: 4.0,
            bloom_per_shot: 1.0,
            bloom_decay_rate: 6.0,
            bloom_decay_delay: 0.2,
            allow_dual_wielding: true,
            ..WeaponConfig::default()
        },
        WeaponConfig {
            name: "rifle".to_string(),
            copies: 2,
            is_automatic: true,
            projectile_damage: 12.0,
            magazine_size: 30,
            rounds_per_min: 600,
            muzzle_velocity: 120.0,
            reload_time: 2.0,
            min_bloom: 0.5,
            max_bloom: 6.0,
            bloom_per_shot: 0.4,
            bloom_decay_rate: 8.0,
            bloom_decay_delay: 0.15,
            ..WeaponConfig::default()
        },
        WeaponConfig {
            name: "shotgun".to_string(),
            copies: 2,
            projectile_damage: 9.0,
            magazine_size: 6,
            rounds_per_min: 70,
            muzzle_velocity: 70.0,
            pellet_count: 8,
            rechamber_each_shot: true,
            rechamber_time: 0.6,
            reload_time: 2.5,
            min_bloom: 5.0,
            max_bloom: 8.0,
            bloom_per_shot: 1.0,
            bloom_decay_rate: 4.0,
            ..WeaponConfig::default()
        },
        WeaponConfig {
            name: "sniper".to_string(),
            copies: 1,
            is_hitscan: true,
            hitscan_range: 500.0,
            projectile_damage: 80.0,
            magazine_size: 5,
            rounds_per_min: 40,
            muzzle_velocity: 300.0,
            projectile_gravity: 0.0,
            rechamber_each_shot: true,
            rechamber_time: 1.0,
            reload_time: 3.0,
            max_bloom: 10.0,
            bloom_per_shot: 10.0,
            bloom_decay_rate: 5.0,
            bloom_decay_delay: 0.5,
            ..WeaponConfig::default()
        },
    ]
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Failed to read weapon catalogue {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed weapon catalogue: {0}")]
    Catalogue(#[from] serde_json::Error),

    #[error("Weapon catalogue {0:?} is empty")]
    EmptyCatalogue(PathBuf),
}
