//! Acoustic analysis engine.
//!
//! [`Analyzer`] is the seam a real processing pipeline would plug into. The default
//! [`StubAnalyzer`] performs no signal processing: it waits through three simulated stages and
//! returns one of four fixed probability vectors chosen by a uniform random draw. The recorded
//! sample has no influence on the outcome.

use crate::analysis::{AnalysisResult, DiagnosisProbabilities};
use crate::config::CoreConfig;
use crate::constants::DEFAULT_STAGE_DELAYS;
use crate::TriageResult;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Receives stage notifications while an analysis runs. Advisory only.
pub type ProgressSender = UnboundedSender<AnalysisStage>;

/// Recorded audio handed to an analyzer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioSample {
    bytes: Vec<u8>,
}

impl AudioSample {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// A placeholder sample with no content.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Processing stages, reported in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisStage {
    NoiseReduction,
    FeatureExtraction,
    Inference,
}

impl AnalysisStage {
    pub const ALL: [AnalysisStage; 3] = [
        AnalysisStage::NoiseReduction,
        AnalysisStage::FeatureExtraction,
        AnalysisStage::Inference,
    ];

    pub fn index(self) -> usize {
        match self {
            AnalysisStage::NoiseReduction => 0,
            AnalysisStage::FeatureExtraction => 1,
            AnalysisStage::Inference => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AnalysisStage::NoiseReduction => "Noise reduction (Wiener)",
            AnalysisStage::FeatureExtraction => "MFCC extraction",
            AnalysisStage::Inference => "TFLite inference",
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Turns a recorded sample into an analysis result.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyses `sample`, which lasted `duration_secs` seconds.
    ///
    /// Stage notifications, if a sender is given, are sent in order before each stage starts.
    ///
    /// # Errors
    ///
    /// Implementations doing real processing report their failures here. The stub never fails.
    async fn analyze(
        &self,
        sample: &AudioSample,
        duration_secs: f64,
        progress: Option<&ProgressSender>,
    ) -> TriageResult<AnalysisResult>;
}

const PNEUMONIA_VECTOR: DiagnosisProbabilities = DiagnosisProbabilities {
    pneumonia: 82.0,
    bronchitis: 12.0,
    asthma: 4.0,
    normal: 2.0,
};
const BRONCHITIS_VECTOR: DiagnosisProbabilities = DiagnosisProbabilities {
    pneumonia: 8.0,
    bronchitis: 76.0,
    asthma: 11.0,
    normal: 5.0,
};
const ASTHMA_VECTOR: DiagnosisProbabilities = DiagnosisProbabilities {
    pneumonia: 5.0,
    bronchitis: 15.0,
    asthma: 74.0,
    normal: 6.0,
};
const NORMAL_VECTOR: DiagnosisProbabilities = DiagnosisProbabilities {
    pneumonia: 2.0,
    bronchitis: 4.0,
    asthma: 5.0,
    normal: 89.0,
};

/// Maps a draw in `[0, 1)` onto one of four equal-width buckets.
pub fn probabilities_for_draw(draw: f64) -> DiagnosisProbabilities {
    if draw > 0.75 {
        PNEUMONIA_VECTOR
    } else if draw > 0.5 {
        BRONCHITIS_VECTOR
    } else if draw > 0.25 {
        ASTHMA_VECTOR
    } else {
        NORMAL_VECTOR
    }
}

/// Placeholder analyzer with fixed latency and input-independent output.
#[derive(Clone, Debug)]
pub struct StubAnalyzer {
    stage_delays: [Duration; 3],
}

impl Default for StubAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_STAGE_DELAYS)
    }
}

impl StubAnalyzer {
    pub fn new(stage_delays: [Duration; 3]) -> Self {
        Self { stage_delays }
    }

    pub fn from_config(cfg: &CoreConfig) -> Self {
        Self::new(cfg.stage_delays())
    }

    /// A stub that completes without waiting.
    pub fn instant() -> Self {
        Self::new([Duration::ZERO; 3])
    }

    /// Total simulated latency.
    pub fn total_delay(&self) -> Duration {
        self.stage_delays.iter().sum()
    }
}

#[async_trait]
impl Analyzer for StubAnalyzer {
    async fn analyze(
        &self,
        _sample: &AudioSample,
        duration_secs: f64,
        progress: Option<&ProgressSender>,
    ) -> TriageResult<AnalysisResult> {
        for (stage, delay) in AnalysisStage::ALL.into_iter().zip(self.stage_delays) {
            tracing::debug!(stage = stage.index(), "analysis stage: {}", stage);
            if let Some(tx) = progress {
                // A dropped receiver only means nobody is watching.
                let _ = tx.send(stage);
            }
            tokio::time::sleep(delay).await;
        }

        let probabilities = probabilities_for_draw(rand::random::<f64>());
        let result = AnalysisResult::new(probabilities, duration_secs);
        tracing::info!(
            id = %result.id(),
            risk = %result.risk_level(),
            "analysis complete"
        );
        Ok(result)
    }
}
