//! Plan and cost policy for the credit engine.
//!
//! This module maps operations to credit costs and plans to entitlements. Every
//! function here is pure; the tables live in [`CostPolicy`] so deployments can
//! override them.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::Plan;

/// Daily credit cap for trial accounts.
pub const DEFAULT_TRIAL_DAILY_CAP: i64 = 10;

/// Millicredits in one credit.
const MILLICREDITS_PER_CREDIT: u128 = 1000;

/// Milliseconds in one second.
const MILLIS_PER_SECOND: u128 = 1000;

/// An operation the request handler wants to price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Image transformation.
    ImageTransform {
        /// Quality mode.
        quality: QualityMode,
        /// Number of output variants requested.
        #[serde(default = "default_variants")]
        variants: u32,
    },

    /// Video generation.
    VideoGeneration {
        /// Model used for generation.
        model: VideoModel,
        /// Requested clip length in milliseconds.
        duration_ms: u64,
    },
}

const fn default_variants() -> u32 {
    1
}

/// Image quality mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    /// Standard quality.
    Standard,
    /// High quality (slower, more expensive).
    High,
}

/// Video generation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoModel {
    /// Fast, low-fidelity draft model.
    Fast,
    /// Default model.
    Standard,
    /// Highest fidelity model.
    Cinematic,
}

/// Download format offered for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    /// PNG image.
    Png,
    /// JPEG image.
    Jpeg,
    /// WebP image.
    Webp,
    /// MP4 video.
    Mp4,
    /// Animated GIF.
    Gif,
    /// `ProRes` master.
    Mov,
}

/// Per-image price for one plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePricing {
    /// Credits per standard-quality image.
    pub standard: i64,
    /// Credits per high-quality image.
    pub high: i64,
}

impl ImagePricing {
    const fn for_quality(self, quality: QualityMode) -> i64 {
        match quality {
            QualityMode::Standard => self.standard,
            QualityMode::High => self.high,
        }
    }
}

/// Features available to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Video models the plan may use.
    pub allowed_video_models: Vec<VideoModel>,
    /// Longest video clip the plan may generate, in seconds.
    pub max_video_duration_secs: u32,
    /// Whether jobs go to the priority queue.
    pub priority_queue: bool,
    /// Formats results may be downloaded in.
    pub download_formats: Vec<DownloadFormat>,
}

impl Entitlement {
    /// Longest video clip as a `Duration`.
    #[must_use]
    pub fn max_video_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_video_duration_secs))
    }
}

/// One-time credit packs sold through checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPack {
    /// 50 credits.
    Small,
    /// 150 credits.
    Medium,
    /// 400 credits.
    Large,
}

impl CreditPack {
    /// Credits granted by the pack.
    #[must_use]
    pub const fn credits(&self) -> i64 {
        match self {
            Self::Small => 50,
            Self::Medium => 150,
            Self::Large => 400,
        }
    }
}

/// Cost and entitlement tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostPolicy {
    /// Per-image prices by plan.
    pub image_pricing: HashMap<Plan, ImagePricing>,

    /// Video rates in millicredits per second, by model.
    pub video_millicredits_per_second: HashMap<VideoModel, i64>,

    /// Entitlements by plan.
    pub entitlements: HashMap<Plan, Entitlement>,

    /// Daily credit cap applied to trial accounts.
    pub trial_daily_cap: i64,
}

impl Default for CostPolicy {
    fn default() -> Self {
        let mut image_pricing = HashMap::new();
        let entry_tier = ImagePricing {
            standard: 4,
            high: 5,
        };
        let upper_tier = ImagePricing {
            standard: 3,
            high: 4,
        };
        image_pricing.insert(Plan::Trial, entry_tier);
        image_pricing.insert(Plan::Basic, entry_tier);
        image_pricing.insert(Plan::Advanced, upper_tier);
        image_pricing.insert(Plan::Premium, upper_tier);

        let mut video_millicredits_per_second = HashMap::new();
        video_millicredits_per_second.insert(VideoModel::Fast, 500); // 0.5 credits/s
        video_millicredits_per_second.insert(VideoModel::Standard, 1000); // 1 credit/s
        video_millicredits_per_second.insert(VideoModel::Cinematic, 2500); // 2.5 credits/s

        let mut entitlements = HashMap::new();
        entitlements.insert(
            Plan::Trial,
            Entitlement {
                allowed_video_models: vec![VideoModel::Fast],
                max_video_duration_secs: 5,
                priority_queue: false,
                download_formats: vec![DownloadFormat::Png, DownloadFormat::Jpeg],
            },
        );
        entitlements.insert(
            Plan::Basic,
            Entitlement {
                allowed_video_models: vec![VideoModel::Fast, VideoModel::Standard],
                max_video_duration_secs: 10,
                priority_queue: false,
                download_formats: vec![
                    DownloadFormat::Png,
                    DownloadFormat::Jpeg,
                    DownloadFormat::Mp4,
                ],
            },
        );
        entitlements.insert(
            Plan::Advanced,
            Entitlement {
                allowed_video_models: vec![
                    VideoModel::Fast,
                    VideoModel::Standard,
                    VideoModel::Cinematic,
                ],
                max_video_duration_secs: 20,
                priority_queue: true,
                download_formats: vec![
                    DownloadFormat::Png,
                    DownloadFormat::Jpeg,
                    DownloadFormat::Webp,
                    DownloadFormat::Mp4,
                    DownloadFormat::Gif,
                ],
            },
        );
        entitlements.insert(
            Plan::Premium,
            Entitlement {
                allowed_video_models: vec![
                    VideoModel::Fast,
                    VideoModel::Standard,
                    VideoModel::Cinematic,
                ],
                max_video_duration_secs: 60,
                priority_queue: true,
                download_formats: vec![
                    DownloadFormat::Png,
                    DownloadFormat::Jpeg,
                    DownloadFormat::Webp,
                    DownloadFormat::Mp4,
                    DownloadFormat::Gif,
                    DownloadFormat::Mov,
                ],
            },
        );

        Self {
            image_pricing,
            video_millicredits_per_second,
            entitlements,
            trial_daily_cap: DEFAULT_TRIAL_DAILY_CAP,
        }
    }
}

impl CostPolicy {
    /// Credits charged for an operation on the given plan.
    ///
    /// Video durations are priced per millisecond and rounded up, so a partial
    /// second never under-charges.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidAmount` for zero variants, zero duration, a
    /// plan or model missing from the tables, or a cost that overflows.
    pub fn cost_of(&self, plan: Plan, operation: &OperationKind) -> Result<i64> {
        match operation {
            OperationKind::ImageTransform { quality, variants } => {
                if *variants == 0 {
                    return Err(EngineError::InvalidAmount(
                        "image transform needs at least one variant".into(),
                    ));
                }
                let pricing = self.image_pricing.get(&plan).ok_or_else(|| {
                    EngineError::InvalidAmount(format!("no image pricing for plan {plan}"))
                })?;
                pricing
                    .for_quality(*quality)
                    .checked_mul(i64::from(*variants))
                    .ok_or_else(|| EngineError::InvalidAmount("image cost overflows".into()))
            }
            OperationKind::VideoGeneration { model, duration_ms } => {
                if *duration_ms == 0 {
                    return Err(EngineError::InvalidAmount(
                        "video duration must be positive".into(),
                    ));
                }
                let rate = self
                    .video_millicredits_per_second
                    .get(model)
                    .copied()
                    .ok_or_else(|| {
                        EngineError::InvalidAmount(format!("no rate for video model {model:?}"))
                    })?;
                let rate = u128::try_from(rate)
                    .map_err(|_| EngineError::InvalidAmount("negative video rate".into()))?;

                // millicredits/s * ms = microcredits; round up to whole credits.
                let micro = rate * u128::from(*duration_ms);
                let credits = micro.div_ceil(MILLICREDITS_PER_CREDIT * MILLIS_PER_SECOND);
                i64::try_from(credits)
                    .map_err(|_| EngineError::InvalidAmount("video cost overflows".into()))
            }
        }
    }

    /// Entitlements for a plan.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` if the table has no entry for the plan.
    pub fn entitlement(&self, plan: Plan) -> Result<&Entitlement> {
        self.entitlements
            .get(&plan)
            .ok_or_else(|| EngineError::Configuration(format!("no entitlement for plan {plan}")))
    }

    /// Check that a plan may run an operation.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotEntitled` for a model the plan does not include or
    /// a clip longer than the plan allows.
    pub fn check_entitlement(&self, plan: Plan, operation: &OperationKind) -> Result<()> {
        let OperationKind::VideoGeneration { model, duration_ms } = operation else {
            return Ok(());
        };

        let entitlement = self.entitlement(plan)?;
        if !entitlement.allowed_video_models.contains(model) {
            return Err(EngineError::NotEntitled {
                plan,
                reason: format!("video model {model:?} is not included"),
            });
        }

        let max_ms = u64::from(entitlement.max_video_duration_secs) * 1000;
        if *duration_ms > max_ms {
            return Err(EngineError::NotEntitled {
                plan,
                reason: format!(
                    "video duration {duration_ms}ms exceeds the {}s limit",
                    entitlement.max_video_duration_secs
                ),
            });
        }

        Ok(())
    }

    /// Daily credit cap for a plan, `None` for uncapped plans.
    #[must_use]
    pub fn daily_credits_cap(&self, plan: Plan) -> Option<i64> {
        plan.is_trial().then_some(self.trial_daily_cap)
    }
}
