//! # Audio filters
//!
//! A [`Filter`] is an immutable set of effect parameters in the shape the node
//! expects under `filters`. Filters combine with [`Filter::merge`] (or `|`):
//! the merge works per named parameter, a parameter set on the later filter
//! wins, and parameters only one side sets are kept. The empty filter is the
//! identity, so folding nothing yields "no effect".
//!
//! ## Example
//!
//! ```rust
//! use lavabridge::filter::{Filter, Timescale};
//!
//! let slow = Filter::default().with_timescale(Timescale {
//!     speed: Some(0.8),
//!     ..Timescale::default()
//! });
//! let loud = Filter::default().with_volume(1.5);
//!
//! let combined = slow | loud;
//! assert_eq!(combined.volume, Some(1.5));
//! ```

mod chain;
pub mod equalizer;

pub use chain::FilterChain;
pub use equalizer::{EqPreset, EqPresets};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::BitOr;

/// Parameter-wise, right-biased combination.
pub trait Merge {
    fn merge(&self, later: &Self) -> Self;
}

impl<T: Merge + Clone> Merge for Option<T> {
    fn merge(&self, later: &Self) -> Self {
        match (self, later) {
            (Some(earlier), Some(later)) => Some(earlier.merge(later)),
            (earlier, later) => later.clone().or_else(|| earlier.clone()),
        }
    }
}

macro_rules! effect {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<f32>,
            )+
        }

        impl Merge for $name {
            fn merge(&self, later: &Self) -> Self {
                Self {
                    $($field: later.$field.or(self.$field),)+
                }
            }
        }
    };
}

effect!(
    /// Removes a frequency band, usually vocals.
    Karaoke { level, mono_level, filter_band, filter_width }
);
effect!(
    /// Speed, pitch and rate multipliers.
    Timescale { speed, pitch, rate }
);
effect!(
    /// Volume oscillation.
    Tremolo { frequency, depth }
);
effect!(
    /// Pitch oscillation.
    Vibrato { frequency, depth }
);
effect!(
    /// Pans the audio around the listener.
    Rotation { rotation_hz }
);
effect!(Distortion {
    sin_offset,
    sin_scale,
    cos_offset,
    cos_scale,
    tan_offset,
    tan_scale,
    offset,
    scale,
});
effect!(
    /// Mixes the left and right channels.
    ChannelMix { left_to_left, left_to_right, right_to_left, right_to_right }
);
effect!(
    /// Suppresses higher frequencies.
    LowPass { smoothing }
);

/// One of the node's fifteen equalizer bands (25 Hz to 16 kHz).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    /// Band index, `0..=14`.
    pub band: u8,
    /// Gain multiplier in `-0.25..=1.0`, 0 is neutral.
    pub gain: f32,
}

pub const EQ_BANDS: u8 = 15;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqBand>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Tremolo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
    /// Filters provided by node plugins, keyed by plugin filter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_filters: Option<Map<String, Value>>,
}

impl Filter {
    /// The identity filter.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Folds filters left to right. Later filters win on conflicts.
    pub fn fold<'a, I>(filters: I) -> Self
    where
        I: IntoIterator<Item = &'a Filter>,
    {
        filters
            .into_iter()
            .fold(Filter::default(), |acc, filter| acc.merge(filter))
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Sets equalizer gains, keyed by band. Bands outside `0..15` are dropped
    /// and gains are clamped to the node's accepted range.
    pub fn with_equalizer(mut self, gains: &[(u8, f32)]) -> Self {
        let bands: BTreeMap<u8, f32> = gains
            .iter()
            .filter(|(band, _)| *band < EQ_BANDS)
            .map(|(band, gain)| (*band, gain.clamp(-0.25, 1.0)))
            .collect();
        self.equalizer = Some(
            bands
                .into_iter()
                .map(|(band, gain)| EqBand { band, gain })
                .collect(),
        );
        self
    }

    pub fn with_karaoke(mut self, karaoke: Karaoke) -> Self {
        self.karaoke = Some(karaoke);
        self
    }

    pub fn with_timescale(mut self, timescale: Timescale) -> Self {
        self.timescale = Some(timescale);
        self
    }

    pub fn with_tremolo(mut self, tremolo: Tremolo) -> Self {
        self.tremolo = Some(tremolo);
        self
    }

    pub fn with_vibrato(mut self, vibrato: Vibrato) -> Self {
        self.vibrato = Some(vibrato);
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = Some(distortion);
        self
    }

    pub fn with_channel_mix(mut self, channel_mix: ChannelMix) -> Self {
        self.channel_mix = Some(channel_mix);
        self
    }

    pub fn with_low_pass(mut self, low_pass: LowPass) -> Self {
        self.low_pass = Some(low_pass);
        self
    }

    pub fn with_plugin_filter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.plugin_filters
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
        self
    }
}

impl Merge for Filter {
    fn merge(&self, later: &Self) -> Self {
        Self {
            volume: later.volume.or(self.volume),
            equalizer: merge_bands(&self.equalizer, &later.equalizer),
            karaoke: self.karaoke.merge(&later.karaoke),
            timescale: self.timescale.merge(&later.timescale),
            tremolo: self.tremolo.merge(&later.tremolo),
            vibrato: self.vibrato.merge(&later.vibrato),
            rotation: self.rotation.merge(&later.rotation),
            distortion: self.distortion.merge(&later.distortion),
            channel_mix: self.channel_mix.merge(&later.channel_mix),
            low_pass: self.low_pass.merge(&later.low_pass),
            plugin_filters: merge_maps(&self.plugin_filters, &later.plugin_filters),
        }
    }
}

fn merge_bands(earlier: &Option<Vec<EqBand>>, later: &Option<Vec<EqBand>>) -> Option<Vec<EqBand>> {
    match (earlier, later) {
        (Some(earlier), Some(later)) => {
            let mut bands: BTreeMap<u8, f32> = BTreeMap::new();
            for band in earlier.iter().chain(later.iter()) {
                bands.insert(band.band, band.gain);
            }
            Some(
                bands
                    .into_iter()
                    .map(|(band, gain)| EqBand { band, gain })
                    .collect(),
            )
        }
        (earlier, later) => later.clone().or_else(|| earlier.clone()),
    }
}

fn merge_maps(
    earlier: &Option<Map<String, Value>>,
    later: &Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match (earlier, later) {
        (Some(earlier), Some(later)) => {
            let mut merged = earlier.clone();
            for (key, value) in later {
                merged.insert(key.clone(), value.clone());
            }
            Some(merged)
        }
        (earlier, later) => later.clone().or_else(|| earlier.clone()),
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        self.merge(&rhs)
    }
}

impl<'a> BitOr<&'a Filter> for &'a Filter {
    type Output = Filter;

    fn bitor(self, rhs: &'a Filter) -> Filter {
        self.merge(rhs)
    }
}
