use super::{Filter, EQ_BANDS};
use crate::{Error, Result};

/// Center frequencies of the node's equalizer bands, in Hz.
pub const EQ_FREQUENCIES: [f32; 15] = [
    25.0, 40.0, 63.0, 100.0, 160.0, 250.0, 400.0, 630.0, 1000.0, 1600.0, 2500.0, 4000.0, 6300.0,
    10000.0, 16000.0,
];

/// Named gain set for the fifteen equalizer bands.
#[derive(Debug, Clone, PartialEq)]
pub struct EqPreset {
    pub name: String,
    /// Gain multipliers, `-0.25..=1.0`, one per band.
    pub gains: [f32; 15],
}

impl EqPreset {
    pub fn custom(gains: [f32; 15]) -> Self {
        Self {
            name: "custom".to_string(),
            gains,
        }
    }

    /// Parses `"frequency:gain"` pairs, e.g. `"25:0.2 1k:-0.1 16k:0.05"`.
    ///
    /// Frequencies snap to the nearest band; bands not mentioned stay flat.
    pub fn parse(config: &str) -> Result<Self> {
        let mut gains = [0.0; 15];

        for part in config.split_whitespace() {
            let (freq, gain) = part
                .split_once(':')
                .ok_or_else(|| Error::Config(format!("invalid band '{part}', use 'frequency:gain'")))?;

            let freq = parse_frequency(freq)
                .ok_or_else(|| Error::Config(format!("invalid frequency in '{part}'")))?;
            let gain: f32 = gain
                .parse()
                .map_err(|_| Error::Config(format!("invalid gain in '{part}'")))?;

            if !(-0.25..=1.0).contains(&gain) {
                return Err(Error::Config(format!(
                    "gain out of range: {gain} (must be between -0.25 and 1.0)"
                )));
            }

            gains[nearest_band(freq)] = gain;
        }

        Ok(Self::custom(gains))
    }

    pub fn to_filter(&self) -> Filter {
        let gains: Vec<(u8, f32)> = (0..EQ_BANDS).zip(self.gains).collect();
        Filter::default().with_equalizer(&gains)
    }
}

impl From<EqPreset> for Filter {
    fn from(preset: EqPreset) -> Self {
        preset.to_filter()
    }
}

fn parse_frequency(raw: &str) -> Option<f32> {
    let raw = raw.trim().to_lowercase();
    match raw.strip_suffix('k') {
        Some(kilo) => kilo.parse::<f32>().ok().map(|v| v * 1000.0),
        None => raw.parse().ok(),
    }
}

fn nearest_band(freq: f32) -> usize {
    EQ_FREQUENCIES
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (freq - **a)
                .abs()
                .partial_cmp(&(freq - **b).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Built-in presets.
pub struct EqPresets;

impl EqPresets {
    pub fn flat() -> EqPreset {
        EqPreset {
            name: "flat".to_string(),
            gains: [0.0; 15],
        }
    }

    pub fn bass() -> EqPreset {
        EqPreset {
            name: "bass".to_string(),
            gains: [
                0.3, 0.25, 0.2, 0.15, 0.1, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            ],
        }
    }

    pub fn pop() -> EqPreset {
        EqPreset {
            name: "pop".to_string(),
            gains: [
                -0.05, 0.0, 0.05, 0.1, 0.15, 0.2, 0.15, 0.1, 0.05, 0.0, -0.05, -0.05, 0.0, 0.0,
                0.0,
            ],
        }
    }

    pub fn rock() -> EqPreset {
        EqPreset {
            name: "rock".to_string(),
            gains: [
                0.25, 0.2, 0.15, 0.1, 0.05, -0.05, -0.05, 0.0, 0.05, 0.1, 0.15, 0.15, 0.2, 0.2,
                0.2,
            ],
        }
    }

    pub fn jazz() -> EqPreset {
        EqPreset {
            name: "jazz".to_string(),
            gains: [
                0.0, 0.05, 0.1, 0.1, 0.15, 0.1, 0.05, 0.0, 0.05, 0.1, 0.1, 0.15, 0.15, 0.1, 0.1,
            ],
        }
    }

    pub fn classical() -> EqPreset {
        EqPreset {
            name: "classical".to_string(),
            gains: [
                0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.05, -0.1, -0.1, -0.1, -0.15,
                -0.15,
            ],
        }
    }

    pub fn electronic() -> EqPreset {
        EqPreset {
            name: "electronic".to_string(),
            gains: [
                0.25, 0.2, 0.1, 0.05, 0.0, -0.1, -0.05, 0.1, 0.05, 0.0, 0.0, 0.1, 0.15, 0.2, 0.2,
            ],
        }
    }

    pub fn vocal() -> EqPreset {
        EqPreset {
            name: "vocal".to_string(),
            gains: [
                -0.1, -0.1, -0.05, 0.0, 0.05, 0.1, 0.2, 0.2, 0.15, 0.1, 0.05, 0.0, -0.05, -0.05,
                -0.05,
            ],
        }
    }

    /// Looks a preset up by name, case-insensitively.
    pub fn get(name: &str) -> Option<EqPreset> {
        match name.to_lowercase().as_str() {
            "flat" | "normal" => Some(Self::flat()),
            "bass" => Some(Self::bass()),
            "pop" => Some(Self::pop()),
            "rock" => Some(Self::rock()),
            "jazz" => Some(Self::jazz()),
            "classical" => Some(Self::classical()),
            "electronic" => Some(Self::electronic()),
            "vocal" => Some(Self::vocal()),
            _ => None,
        }
    }

    pub fn list() -> Vec<&'static str> {
        vec![
            "flat",
            "bass",
            "pop",
            "rock",
            "jazz",
            "classical",
            "electronic",
            "vocal",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_preset_resolves() {
        for name in EqPresets::list() {
            let preset = EqPresets::get(name).unwrap();
            assert_eq!(preset.name, name);
            assert!(preset.gains.iter().all(|g| (-0.25..=1.0).contains(g)));
        }
        assert_eq!(EqPresets::get("NORMAL"), Some(EqPresets::flat()));
        assert!(EqPresets::get("dubstep").is_none());
    }

    #[test]
    fn preset_becomes_full_equalizer() {
        let bands = EqPresets::bass().to_filter().equalizer.unwrap();
        assert_eq!(bands.len(), 15);
        assert_eq!(bands[0].band, 0);
        assert_eq!(bands[0].gain, 0.3);
        assert_eq!(bands[14].band, 14);
    }

    #[test]
    fn parses_band_config() {
        let preset = EqPreset::parse("25:0.2 1k:-0.1 15k:0.05").unwrap();
        assert_eq!(preset.gains[0], 0.2);
        assert_eq!(preset.gains[8], -0.1);
        assert_eq!(preset.gains[14], 0.05);
        assert_eq!(preset.gains[3], 0.0);

        assert!(EqPreset::parse("25").is_err());
        assert!(EqPreset::parse("abc:0.1").is_err());
        assert!(EqPreset::parse("25:3.0").is_err());
    }
}
