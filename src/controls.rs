//! Ingestion pacing and query-randomisation controls.

use clap::Args;
use std::time::Duration;

use crate::search::DEFAULT_PAGE_SIZE;

/// Default global stop count.
pub const DEFAULT_GLOBAL_TARGET: u64 = 100_000;
/// Provider pagination limit.
pub const DEFAULT_MAX_PAGE: u32 = 20;

/// Tunable knobs that bound an ingestion run.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestControls {
    page_size: u32,
    max_page: u32,
    orientation_probability: f64,
    term_drop_probability: f64,
    image_delay: Duration,
    global_target: u64,
    max_iterations: Option<u64>,
}

impl IngestControls {
    /// Constructs a new set of ingestion controls.
    pub fn new(
        page_size: u32,
        max_page: u32,
        orientation_probability: f64,
        term_drop_probability: f64,
        image_delay: Duration,
        global_target: u64,
        max_iterations: Option<u64>,
    ) -> Self {
        Self {
            page_size: page_size.max(1),
            max_page: max_page.max(1),
            orientation_probability,
            term_drop_probability,
            image_delay,
            global_target,
            max_iterations,
        }
    }

    /// Results requested per search call.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Highest page number a query may ask for.
    pub fn max_page(&self) -> u32 {
        self.max_page
    }

    /// Chance of adding an orientation filter.
    pub fn orientation_probability(&self) -> f64 {
        self.orientation_probability
    }

    /// Chance of dropping one word from a multi-word term.
    pub fn term_drop_probability(&self) -> f64 {
        self.term_drop_probability
    }

    /// Pause after every stored image.
    pub fn image_delay(&self) -> Duration {
        self.image_delay
    }

    /// Total stored images at which the run stops.
    pub fn global_target(&self) -> u64 {
        self.global_target
    }

    /// Optional cap on scheduling iterations.
    pub fn max_iterations(&self) -> Option<u64> {
        self.max_iterations
    }

    /// Same controls with a different global target.
    pub fn with_global_target(mut self, target: u64) -> Self {
        self.global_target = target;
        self
    }

    /// Same controls with a different per-image pause.
    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = delay;
        self
    }

    /// Same controls with an iteration cap.
    pub fn with_max_iterations(mut self, max: Option<u64>) -> Self {
        self.max_iterations = max;
        self
    }
}

impl Default for IngestControls {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_page: DEFAULT_MAX_PAGE,
            orientation_probability: 0.3,
            term_drop_probability: 0.3,
            image_delay: Duration::from_millis(500),
            global_target: DEFAULT_GLOBAL_TARGET,
            max_iterations: None,
        }
    }
}

/// Command-line flags shared by binaries that drive ingestion.
#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Stop once this many images are stored in total
    #[arg(long, env = "MOODBOARD_TARGET", default_value_t = DEFAULT_GLOBAL_TARGET)]
    pub target: u64,

    /// Results requested per search call
    #[arg(long, env = "MOODBOARD_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Highest result page to sample from
    #[arg(long, env = "MOODBOARD_MAX_PAGE", default_value_t = DEFAULT_MAX_PAGE)]
    pub max_page: u32,

    /// Probability of restricting a search to one orientation
    #[arg(long, env = "MOODBOARD_ORIENTATION_PROBABILITY", default_value_t = 0.3)]
    pub orientation_probability: f64,

    /// Probability of dropping a word from multi-word search terms
    #[arg(long, env = "MOODBOARD_TERM_DROP_PROBABILITY", default_value_t = 0.3)]
    pub term_drop_probability: f64,

    /// Milliseconds to pause after each stored image
    #[arg(long, env = "MOODBOARD_IMAGE_DELAY_MS", default_value_t = 500)]
    pub image_delay_ms: u64,

    /// Stop after this many scheduling iterations
    #[arg(long, env = "MOODBOARD_MAX_ITERATIONS")]
    pub max_iterations: Option<u64>,
}

impl IngestArgs {
    /// Converts the parsed flags into `IngestControls`.
    pub fn build_controls(&self) -> IngestControls {
        IngestControls::new(
            self.page_size,
            self.max_page,
            self.orientation_probability.clamp(0.0, 1.0),
            self.term_drop_probability.clamp(0.0, 1.0),
            Duration::from_millis(self.image_delay_ms),
            self.target,
            self.max_iterations,
        )
    }
}
