use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for objstash.
    #[serde(
        deserialize_with = "deserialize_level_filter",
        serialize_with = "serialize_level_filter"
    )]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "objstash".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// How references to graphs containing mutable objects are handed out.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutablePolicy {
    /// Every reference of one generation aliases the materialized graph.
    ///
    /// A write through one reference is visible to all other references of the same
    /// generation. Writes are never reflected in the stored bytes.
    #[default]
    Shared,
    /// Every fetch receives a private deep copy of the materialized graph.
    ///
    /// Graphs consisting only of immutable objects are shared regardless.
    CopyOnFetch,
}

/// Where and when the store dumps and primes its contents.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Path of the snapshot file. Without a path, snapshots are only written on request.
    pub path: Option<PathBuf>,
    /// Load the snapshot (if it exists) when the store is initialized.
    pub load_on_initialize: bool,
    /// Write a snapshot of all live entries when the store is torn down.
    pub dump_on_teardown: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            load_on_initialize: true,
            dump_on_teardown: false,
        }
    }
}

/// Configuration of a single [`ObjectStore`](crate::caching::ObjectStore).
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the store, used to tag metrics and logs.
    pub name: String,

    /// Encode repeated and cyclic objects as back references.
    ///
    /// When disabled, shared objects are encoded once per occurrence and storing a cyclic graph
    /// fails.
    pub back_references: bool,

    /// Maximum size (in bytes) of a single encoded value.
    ///
    /// Defaults to `64 MiB`.
    pub max_value_size: Option<usize>,

    /// Maximum nesting depth of lists, maps and objects when encoding and decoding.
    pub max_depth: usize,

    /// Time-to-live applied to entries written by `store`.
    ///
    /// Defaults to no expiration.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,

    /// Interval of the periodic sweep that evicts expired entries.
    ///
    /// Expired entries are never returned, the sweep only frees their memory early.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,

    /// Aliasing policy for graphs containing mutable objects.
    pub mutable_objects: MutablePolicy,

    /// Snapshot dump / prime settings.
    pub snapshot: SnapshotConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "objstash".into(),
            back_references: true,
            max_value_size: Some(64 * 1024 * 1024),
            max_depth: 512,
            default_ttl: None,
            sweep_interval: Some(Duration::from_secs(60)),
            mutable_objects: MutablePolicy::Shared,
            snapshot: SnapshotConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: Logging,
    /// Metrics configuration.
    pub metrics: Metrics,
    /// The object store.
    pub store: StoreConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

fn serialize_level_filter<S: serde::Serializer>(
    level: &LevelFilter,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&level.to_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config() {
        // It should be possible to set individual store options in reasonable units without
        // affecting the other defaults.
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.store, StoreConfig::default());

        let yaml = r#"
            store:
              default_ttl: 1h
              mutable_objects: copy_on_fetch
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.store.default_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.store.mutable_objects, MutablePolicy::CopyOnFetch);
        assert_eq!(cfg.store.sweep_interval, Some(Duration::from_secs(60)));
        assert!(cfg.store.back_references);
        assert_eq!(cfg.store.snapshot, SnapshotConfig::default());
    }

    #[test]
    fn test_disabling_sweep() {
        // It should be possible to set a duration to `None` meaning "never".
        let yaml = r#"
            store:
              sweep_interval: null
              max_value_size: null
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.store.sweep_interval, None);
        assert_eq!(cfg.store.max_value_size, None);
        assert_eq!(cfg.store.max_depth, StoreConfig::default().max_depth);
    }

    #[test]
    fn test_snapshot_config() {
        let yaml = r#"
            store:
              snapshot:
                path: /var/lib/objstash/snapshot.bin
                dump_on_teardown: true
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.store.snapshot.path.as_deref(),
            Some(Path::new("/var/lib/objstash/snapshot.bin"))
        );
        assert!(cfg.store.snapshot.load_on_initialize);
        assert!(cfg.store.snapshot.dump_on_teardown);
    }

    #[test]
    fn test_logging_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            store:
              not_an_option: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
