use serde::Deserialize;

/// Decides which associated tracks are moved to the detected location
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RespawnPolicy {
    /// Reacquire every track except those followed by optical flow alone
    /// since they were spawned. Once association has been wrong for a track
    /// it stays wrong under flow, so such tracks are re-validated every time.
    NonPureFlow,
    /// Only tracks lost by optical flow are reacquired
    InactiveOnly,
    /// Every associated track is moved to its detection
    Always,
}

impl Default for RespawnPolicy {
    fn default() -> Self {
        RespawnPolicy::NonPureFlow
    }
}

#[derive(Clone, Debug, Deserialize)]
#[derive(clap::Parser)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of inactive tracks kept around for reacquisition
    #[clap(long, default_value = "200")]
    pub max_inactive_tracks: usize,

    /// Active tracks this close to another one are pruned. Disabled if <= 0
    #[clap(long, default_value = "0")]
    pub too_close_radius: f64,

    /// Seed of the generator picking inactive tracks to drop
    #[clap(long, default_value = "345")]
    pub seed: u64,

    #[clap(long, value_enum, default_value = "non-pure-flow")]
    pub respawn: RespawnPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inactive_tracks: 200,
            too_close_radius: 0.,
            seed: 345,
            respawn: RespawnPolicy::default(),
        }
    }
}
