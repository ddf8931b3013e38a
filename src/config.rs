//! Configuration: archive constants, model profiles and remote URL templates.
//!
//! The file is YAML with three top level keys, `constants`, `models` and `urlPatterns`:
//!
//! ```yaml
//! constants:
//!   archive: grib
//!   rootSrc: /data/grib/
//!   leftlon: 95
//!   rightlon: 100
//!   toplat: 37
//!   bottomlat: 34
//! models:
//!   GEPS:
//!     members: 20
//!     fHours: 120
//!     memberName: cmc_gep
//!     controlName: cmc_gec
//!     increment: 12
//!     base: 0
//! urlPatterns:
//!   GEPS: "https://example.com/filter?file={model_name}.t{init_time:02d}z.f{fhour:03d}&dir=%2Fcmce.{yyyymmdd}%2F{ztime:02d}"
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{errors::GribArchiveErr, models::ModelProfile};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    constants: RawConstants,
    #[serde(default)]
    models: BTreeMap<String, RawModel>,
    #[serde(default)]
    url_patterns: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConstants {
    #[serde(default)]
    archive: Option<String>,
    root_src: PathBuf,
    #[serde(default)]
    dbname: Option<PathBuf>,
    leftlon: f64,
    rightlon: f64,
    toplat: f64,
    bottomlat: f64,
    #[serde(default)]
    max_concurrent_fetches: Option<usize>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    retention_days: Option<i64>,
    #[serde(default)]
    retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    members: u32,
    f_hours: u32,
    member_name: String,
    control_name: String,
    increment: u32,
    base: u32,
    #[serde(default)]
    cycle_interval: Option<u32>,
}

/// The region requested from the remote service.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Western edge, degrees.
    pub left_lon: f64,
    /// Eastern edge, degrees.
    pub right_lon: f64,
    /// Northern edge, degrees.
    pub top_lat: f64,
    /// Southern edge, degrees.
    pub bottom_lat: f64,
}

/// Archive wide settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Constants {
    /// Name of the archive, informational.
    pub archive: String,
    /// Root directory of the downloaded files.
    pub root: PathBuf,
    /// Location of the index database.
    pub db_file: PathBuf,
    /// Region to request.
    pub bounding_box: BoundingBox,
    /// Upper bound on simultaneous downloads.
    pub max_concurrent_fetches: usize,
    /// Timeout for a single download.
    pub timeout: Duration,
    /// Records older than this many days are swept.
    pub retention_days: i64,
    /// How many times a transient failure is retried.
    pub retries: u32,
}

/// The complete, validated configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Archive wide settings.
    pub constants: Constants,
    /// Model profiles by name.
    pub models: BTreeMap<String, ModelProfile>,
}

impl Config {
    const DEFAULT_ARCHIVE: &'static str = "grib";
    const DB_FILE: &'static str = "index.db";
    const MAX_CONCURRENT_FETCHES: usize = 8;
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_RETENTION_DAYS: i64 = 3;
    const DEFAULT_RETRIES: u32 = 2;

    /// Load the configuration from a YAML file.
    pub fn load(path: &dyn AsRef<Path>) -> Result<Self, GribArchiveErr> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            GribArchiveErr::Config(format!("unable to read {}: {}", path.as_ref().display(), err))
        })?;

        Self::from_yaml(&text)
    }

    /// Parse the configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, GribArchiveErr> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Result<Self, GribArchiveErr> {
        let RawConfig {
            constants,
            models,
            url_patterns,
        } = raw;

        let db_file = constants
            .dbname
            .unwrap_or_else(|| constants.root_src.join(Self::DB_FILE));

        let constants = Constants {
            archive: constants
                .archive
                .unwrap_or_else(|| Self::DEFAULT_ARCHIVE.to_owned()),
            root: constants.root_src,
            db_file,
            bounding_box: BoundingBox {
                left_lon: constants.leftlon,
                right_lon: constants.rightlon,
                top_lat: constants.toplat,
                bottom_lat: constants.bottomlat,
            },
            max_concurrent_fetches: constants
                .max_concurrent_fetches
                .unwrap_or(Self::MAX_CONCURRENT_FETCHES)
                .clamp(1, Self::MAX_CONCURRENT_FETCHES),
            timeout: Duration::from_secs(
                constants.timeout_secs.unwrap_or(Self::DEFAULT_TIMEOUT_SECS),
            ),
            retention_days: constants
                .retention_days
                .unwrap_or(Self::DEFAULT_RETENTION_DAYS),
            retries: constants.retries.unwrap_or(Self::DEFAULT_RETRIES),
        };

        if constants.retention_days < 0 {
            return Err(GribArchiveErr::Config(
                "retentionDays must not be negative".to_owned(),
            ));
        }

        let mut url_patterns = url_patterns;
        let models = models
            .into_iter()
            .map(|(name, raw)| {
                let url_pattern = url_patterns.remove(&name).ok_or_else(|| {
                    GribArchiveErr::Config(format!("no url pattern for model {}", name))
                })?;
                Self::resolve_model(name, raw, url_pattern).map(|p| (p.name.clone(), p))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Config { constants, models })
    }

    fn resolve_model(
        name: String,
        raw: RawModel,
        url_pattern: String,
    ) -> Result<ModelProfile, GribArchiveErr> {
        let cycle_interval = raw.cycle_interval.unwrap_or(raw.increment);

        if raw.increment == 0 {
            return Err(GribArchiveErr::Config(format!(
                "{}: increment must be positive",
                name
            )));
        }

        if cycle_interval == 0 || 24 % cycle_interval != 0 {
            return Err(GribArchiveErr::Config(format!(
                "{}: cycle interval {} does not divide a day",
                name, cycle_interval
            )));
        }

        if raw.base >= cycle_interval {
            return Err(GribArchiveErr::Config(format!(
                "{}: base hour {} must be less than the cycle interval {}",
                name, raw.base, cycle_interval
            )));
        }

        Ok(ModelProfile {
            name,
            members: raw.members,
            max_forecast_hour: raw.f_hours,
            forecast_hour_increment: raw.increment,
            member_prefix: raw.member_name,
            control_prefix: raw.control_name,
            cycle_interval,
            cycle_base: raw.base,
            url_pattern,
        })
    }

    /// Look up a model profile by name.
    pub fn profile(&self, model: &str) -> Result<&ModelProfile, GribArchiveErr> {
        self.models
            .get(model)
            .ok_or_else(|| GribArchiveErr::InvalidModelName(model.to_owned()))
    }

    /// Override the archive root. The index moves with it unless it was configured explicitly
    /// outside the old root.
    pub fn with_root(mut self, root: PathBuf) -> Self {
        if self.constants.db_file == self.constants.root.join(Self::DB_FILE) {
            self.constants.db_file = root.join(Self::DB_FILE);
        }
        self.constants.root = root;
        self
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
#[cfg(test)]
pub(crate) mod unit {
    use super::*;

    pub(crate) const TEST_CONFIG: &str = r#"
constants:
  archive: grib
  rootSrc: /tmp/grib/
  leftlon: 95
  rightlon: 100
  toplat: 37
  bottomlat: 34
models:
  GEPS:
    members: 20
    fHours: 120
    memberName: cmc_gep
    controlName: cmc_gec
    increment: 12
    base: 0
  GEFS:
    members: 30
    fHours: 120
    memberName: gep
    controlName: gec
    increment: 12
    base: 0
urlPatterns:
  GEPS: "https://nomads.example/filter_cmcens.pl?file={model_name:s}.t{init_time:02d}z.pgrb2a.0p50.f{fhour:03d}&leftlon={leftlon:f}&rightlon={rightlon:f}&toplat={toplat:f}&bottomlat={bottomlat:f}&dir=%2Fcmce.{yyyymmdd:s}%2F{ztime:02d}%2Fpgrb2ap5"
  GEFS: "https://nomads.example/filter_gefs.pl?file={model_name}.t{init_time:02d}z.pgrb2a.0p50.f{fhour:03d}&dir=%2Fgefs.{yyyymmdd}%2F{ztime:02d}%2Fatmos%2Fpgrb2ap5"
"#;

    #[test]
    fn test_parse_defaults() {
        let config = Config::from_yaml(TEST_CONFIG).expect("valid config");

        assert_eq!(config.constants.archive, "grib");
        assert_eq!(config.constants.db_file, PathBuf::from("/tmp/grib/index.db"));
        assert_eq!(config.constants.max_concurrent_fetches, 8);
        assert_eq!(config.constants.timeout, Duration::from_secs(30));
        assert_eq!(config.constants.retention_days, 3);
        assert_eq!(config.constants.bounding_box.left_lon, 95.0);

        let geps = config.profile("GEPS").expect("GEPS configured");
        assert_eq!(geps.members, 20);
        assert_eq!(geps.cycle_interval, 12);
        assert_eq!(geps.control_prefix, "cmc_gec");
        assert!(geps.url_pattern.contains("filter_cmcens"));
        assert!(config.profile("NAEFS").is_err());
    }

    #[test]
    fn test_missing_url_pattern_rejected() {
        let text = TEST_CONFIG.replace("  GEFS: \"https", "  OTHER: \"https");
        match Config::from_yaml(&text) {
            Err(GribArchiveErr::Config(msg)) => assert!(msg.contains("GEFS")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bad_interval_rejected() {
        let text = TEST_CONFIG.replacen("increment: 12", "increment: 7", 1);
        assert!(Config::from_yaml(&text).is_err());
    }

    #[test]
    fn test_with_root_moves_index() {
        let config = Config::from_yaml(TEST_CONFIG)
            .unwrap()
            .with_root(PathBuf::from("/elsewhere"));
        assert_eq!(config.constants.db_file, PathBuf::from("/elsewhere/index.db"));
    }
}
