//! Built-in Pipelines
//!
//! Ready-made workflow definitions shipped with the engine.

pub mod model_selection;

pub use model_selection::{
    build_default, build_with_scorer, choose_best, fixed_scorer, random_scorer, Scorer, Verdict,
    ACCURACY_THRESHOLD, BEST_MODEL_KEY, MAX_SCORE, MIN_SCORE, MODELS,
};
