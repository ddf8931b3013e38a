//! Deterministic local paths and remote requests for artifacts.

use std::path::{Path, PathBuf};

use crate::{
    config::{BoundingBox, Config},
    cycle::Cycle,
    models::{ArtifactKey, Member, ModelProfile},
    remote::RemoteRequest,
};

/// Maps artifact keys to where they live locally and how to ask for them remotely.
///
/// Everything here is a pure function of the key and the configuration, so paths can be computed
/// for artifacts that have never been downloaded.
#[derive(Clone, Debug)]
pub struct NamingScheme {
    root: PathBuf,
    bounding_box: BoundingBox,
}

// A value substituted into a URL template.
enum TemplateValue<'a> {
    Text(&'a str),
    Int(u32),
    Float(f64),
}

impl NamingScheme {
    const EXTENSION: &'static str = "grib";

    /// Create a scheme rooted at `root`, requesting `bounding_box`.
    pub fn new(root: &dyn AsRef<Path>, bounding_box: BoundingBox) -> Self {
        NamingScheme {
            root: root.as_ref().to_path_buf(),
            bounding_box,
        }
    }

    /// Create a scheme from the archive configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.constants.root, config.constants.bounding_box)
    }

    /// The name of the member as used by the remote service, e.g. `cmc_gec00` or `gep07`.
    pub fn member_token(profile: &ModelProfile, member: Member) -> String {
        match member {
            Member::Control => format!("{}00", profile.control_prefix),
            Member::Perturbation(idx) => format!("{}{:02}", profile.member_prefix, idx),
        }
    }

    /// The file name of an artifact, e.g. `GEPS.20221001.00z.f024.cmc_gep03.grib`.
    pub fn file_name(
        profile: &ModelProfile,
        cycle: Cycle,
        member: Member,
        forecast_hour: u32,
    ) -> String {
        format!(
            "{}.{}.{:02}z.f{:03}.{}.{}",
            profile.name,
            cycle.date_str(),
            cycle.hour(),
            forecast_hour,
            Self::member_token(profile, member),
            Self::EXTENSION,
        )
    }

    /// Where an artifact is stored: `root/model/YYYYMMDDHH/file_name`.
    pub fn local_path(
        &self,
        profile: &ModelProfile,
        cycle: Cycle,
        member: Member,
        forecast_hour: u32,
    ) -> PathBuf {
        self.root
            .join(&profile.name)
            .join(cycle.to_string())
            .join(Self::file_name(profile, cycle, member, forecast_hour))
    }

    /// [`local_path`](Self::local_path) for a key.
    pub fn local_path_for(&self, profile: &ModelProfile, key: &ArtifactKey) -> PathBuf {
        self.local_path(profile, key.cycle, key.member, key.forecast_hour)
    }

    /// Fill the model's URL template for one artifact.
    ///
    /// Recognized placeholders are `model_name`, `init_time`, `fhour`, `leftlon`, `rightlon`,
    /// `toplat`, `bottomlat`, `yyyymmdd` and `ztime`, each optionally followed by a format hint
    /// such as `:02d`, `:03d`, `:f` or `:s`. Unknown placeholders are left in place.
    pub fn remote_request(
        &self,
        profile: &ModelProfile,
        cycle: Cycle,
        member: Member,
        forecast_hour: u32,
    ) -> RemoteRequest {
        let token = Self::member_token(profile, member);
        let date = cycle.date_str();
        let bbox = self.bounding_box;

        let lookup = |name: &str| {
            use TemplateValue::*;

            match name {
                "model_name" => Some(Text(&token)),
                "init_time" | "ztime" => Some(Int(cycle.hour())),
                "fhour" => Some(Int(forecast_hour)),
                "leftlon" => Some(Float(bbox.left_lon)),
                "rightlon" => Some(Float(bbox.right_lon)),
                "toplat" => Some(Float(bbox.top_lat)),
                "bottomlat" => Some(Float(bbox.bottom_lat)),
                "yyyymmdd" => Some(Text(&date)),
                _ => None,
            }
        };

        RemoteRequest::new(fill_template(&profile.url_pattern, lookup))
    }

    /// [`remote_request`](Self::remote_request) for a key.
    pub fn remote_request_for(&self, profile: &ModelProfile, key: &ArtifactKey) -> RemoteRequest {
        self.remote_request(profile, key.cycle, key.member, key.forecast_hour)
    }
}

fn fill_template<'a, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<TemplateValue<'a>>,
{
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open..];

        let close = match after_open.find('}') {
            Some(close) => close,
            None => {
                rest = after_open;
                break;
            }
        };

        let placeholder = &after_open[1..close];
        let (name, spec) = match placeholder.find(':') {
            Some(colon) => (&placeholder[..colon], &placeholder[colon + 1..]),
            None => (placeholder, ""),
        };

        match lookup(name) {
            Some(value) => out.push_str(&format_value(value, spec)),
            None => out.push_str(&after_open[..=close]),
        }

        rest = &after_open[close + 1..];
    }

    out.push_str(rest);
    out
}

fn format_value(value: TemplateValue, spec: &str) -> String {
    let width: usize = spec
        .trim_start_matches('0')
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap_or(0);
    let zero_pad = spec.starts_with('0');

    match value {
        TemplateValue::Text(text) => text.to_owned(),
        TemplateValue::Int(val) if zero_pad => format!("{:0width$}", val, width = width),
        TemplateValue::Int(val) => format!("{:width$}", val, width = width),
        TemplateValue::Float(val) if spec.ends_with('f') => format!("{:.6}", val),
        TemplateValue::Float(val) => format!("{}", val),
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
