use serde::Deserialize;

/// Frames a healthy node sends per minute (one every 20ms).
const EXPECTED_FRAMES: f64 = 3000.0;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub players: u32,
    pub playing_players: u32,
    /// Milliseconds since the node started.
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: u32,
    /// System-wide load in `0.0..=1.0`.
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

impl Stats {
    /// Load score used to rank nodes; lower is better.
    ///
    /// Playing players count one each, CPU load and missing frames add
    /// exponentially growing penalties.
    pub fn load(&self) -> u64 {
        let players = f64::from(self.playing_players);
        let cpu = 1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0;

        let (deficit, nulled) = match &self.frame_stats {
            Some(frames) => {
                let deficit_ratio = frames.deficit.max(0) as f64 / EXPECTED_FRAMES;
                let nulled_ratio = frames.nulled.max(0) as f64 / EXPECTED_FRAMES;
                (
                    1.03f64.powf(500.0 * deficit_ratio) * 600.0 - 600.0,
                    (1.03f64.powf(500.0 * nulled_ratio) * 300.0 - 300.0) * 2.0,
                )
            }
            None => (0.0, 0.0),
        };

        (players + cpu + deficit + nulled).max(0.0).round() as u64
    }
}
