//! Encoding profile registry
//!
//! A profile names an output container and the encoder arguments of a
//! two-pass encode, split into the arguments every pass gets and the ones
//! only the analysis pass or only the output pass gets.

use crate::config::ProfileConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named encoder preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    /// Registry key, e.g. "webm"
    pub name: String,
    /// Output file extension without the dot
    pub container_extension: String,
    /// Muxer passed to `-f`
    pub muxer_format_name: String,
    /// Arguments for every pass, in order
    pub all_stage_args: Vec<String>,
    /// Arguments for the analysis pass only
    pub first_stage_args: Vec<String>,
    /// Arguments for the output pass only
    pub second_stage_args: Vec<String>,
}

impl EncodingProfile {
    pub fn from_config(name: &str, cfg: &ProfileConfig) -> Self {
        Self {
            name: name.to_string(),
            container_extension: cfg.extension.trim_start_matches('.').to_string(),
            muxer_format_name: cfg.format.clone(),
            all_stage_args: cfg.all.clone(),
            first_stage_args: cfg.first.clone(),
            second_stage_args: cfg.second.clone(),
        }
    }

    /// VP9 in WebM
    pub fn webm() -> Self {
        let threads = default_thread_count().to_string();
        Self {
            name: "webm".to_string(),
            container_extension: "webm".to_string(),
            muxer_format_name: "webm".to_string(),
            #[rustfmt::skip]
            all_stage_args: strings(&[
                "-c:v", "libvpx-vp9",
                "-tile-columns", "6",
                "-threads", threads.as_str(),
                "-static-thresh", "0",
                "-frame-parallel", "0",
                "-auto-alt-ref", "1",
                "-lag-in-frames", "25",
                "-g", "288",
                "-pix_fmt", "yuv420p",
            ]),
            first_stage_args: strings(&["-speed", "4"]),
            second_stage_args: strings(&["-speed", "1"]),
        }
    }

    /// AV1 (libaom) in Matroska
    pub fn av1() -> Self {
        let threads = default_thread_count().to_string();
        Self {
            name: "av1".to_string(),
            container_extension: "mkv".to_string(),
            muxer_format_name: "matroska".to_string(),
            #[rustfmt::skip]
            all_stage_args: strings(&[
                "-c:v", "libaom-av1",
                "-tile-columns", "2",
                "-threads", threads.as_str(),
                "-row-mt", "1",
                "-lag-in-frames", "25",
                "-g", "288",
                "-pix_fmt", "yuv420p",
                "-strict", "experimental",
            ]),
            first_stage_args: strings(&["-cpu-used", "6"]),
            second_stage_args: strings(&["-cpu-used", "4"]),
        }
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Encoder thread count used by the built-in profiles
pub fn default_thread_count() -> usize {
    num_cpus::get().max(1)
}

/// Registry of profiles keyed by name
///
/// Edits only affect jobs planned afterwards: the planner copies a profile's
/// arguments into the stage commands.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, EncodingProfile>,
}

impl ProfileRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `webm` and `av1` profiles
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.insert(EncodingProfile::webm());
        registry.insert(EncodingProfile::av1());
        registry
    }

    /// Built-ins plus the profiles from the config file (config wins on name clash)
    pub fn from_config(profiles: &BTreeMap<String, ProfileConfig>) -> Self {
        let mut registry = Self::with_builtins();
        for (name, cfg) in profiles {
            registry.insert(EncodingProfile::from_config(name, cfg));
        }
        registry
    }

    /// Add or replace a profile, returning the previous one
    pub fn insert(&mut self, profile: EncodingProfile) -> Option<EncodingProfile> {
        self.profiles.insert(profile.name.clone(), profile)
    }

    pub fn get(&self, name: &str) -> Option<&EncodingProfile> {
        self.profiles.get(name)
    }

    /// Replace the argument sets of an existing profile.
    ///
    /// Returns false if no profile has that name.
    pub fn update_args(
        &mut self,
        name: &str,
        all: Vec<String>,
        first: Vec<String>,
        second: Vec<String>,
    ) -> bool {
        match self.profiles.get_mut(name) {
            Some(profile) => {
                profile.all_stage_args = all;
                profile.first_stage_args = first;
                profile.second_stage_args = second;
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncodingProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
