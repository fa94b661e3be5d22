//! Model Selection Pipeline
//!
//! The built-in workflow: three training tasks score candidate models in
//! parallel, a branch task picks the best score and routes to an accurate
//! or inaccurate path, and a summarizer logs the final outcome whichever
//! path ran.
//!
//! ```text
//! training_model_A \
//! training_model_B  -> choose_best_model -> is_accurate   \
//! training_model_C /                     \> is_inaccurate  -> log_accurate_model
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use log::info;
use rand::Rng;

use crate::execution::context::{TaskContext, TaskError};
use crate::workflow::model::{BranchArm, Outcome, Schedule, Task, TriggerRule, Workflow};
use crate::workflow::validator::{validate_workflow, WorkflowError};

/// Candidate models, in selection-priority order.
pub const MODELS: [&str; 3] = ["A", "B", "C"];

/// A score must be strictly greater than this to count as accurate.
pub const ACCURACY_THRESHOLD: u32 = 8;

/// Lowest score a training run can produce.
pub const MIN_SCORE: u32 = 1;

/// Highest score a training run can produce.
pub const MAX_SCORE: u32 = 10;

/// Key under which the selector publishes the winning model name.
pub const BEST_MODEL_KEY: &str = "best_model";

/// Task id of the selector branch.
pub const CHOOSE_BEST_MODEL: &str = "choose_best_model";

/// Task id of the accurate path.
pub const IS_ACCURATE: &str = "is_accurate";

/// Task id of the inaccurate path.
pub const IS_INACCURATE: &str = "is_inaccurate";

/// Task id of the summarizer.
pub const LOG_ACCURATE_MODEL: &str = "log_accurate_model";

/// Produces an accuracy score for a model name.
pub type Scorer = Arc<dyn Fn(&str) -> u32 + Send + Sync>;

/// The default scorer: a uniform random score in `MIN_SCORE..=MAX_SCORE`.
pub fn random_scorer() -> Scorer {
    Arc::new(|_model| rand::thread_rng().gen_range(MIN_SCORE..=MAX_SCORE))
}

/// A scorer returning preset scores, for reproducible runs.
///
/// Models absent from the map score `MIN_SCORE`.
pub fn fixed_scorer(scores: HashMap<String, u32>) -> Scorer {
    Arc::new(move |model| scores.get(model).copied().unwrap_or(MIN_SCORE))
}

/// Verdict of the selector branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The best score cleared the accuracy threshold
    Accurate,
    /// No score cleared the threshold
    Inaccurate,
}

impl Verdict {
    /// The branch outcome label for this verdict.
    pub fn outcome(self) -> Outcome {
        match self {
            Verdict::Accurate => Outcome::new("accurate"),
            Verdict::Inaccurate => Outcome::new("inaccurate"),
        }
    }
}

/// Returns the task id of the training task for a model.
pub fn training_task_id(model: &str) -> String {
    format!("training_model_{}", model)
}

/// Picks the best model from (model, score) pairs.
///
/// Ties go to the earliest pair, so with the standard ordering a tie
/// resolves to the first model declared.
pub fn choose_best(scores: &[(String, u32)]) -> Option<(String, u32)> {
    scores
        .iter()
        .fold(None, |best: Option<&(String, u32)>, candidate| match best {
            Some(current) if current.1 >= candidate.1 => Some(current),
            _ => Some(candidate),
        })
        .cloned()
}

fn training_task(model: &'static str, scorer: Scorer) -> Task {
    Task::action(training_task_id(model), move |ctx: &TaskContext| {
        let score = scorer(model);
        info!("Training model {}: score {}", model, score);
        ctx.push_return(&score)
    })
}

fn selector_task() -> Task {
    Task::branch(
        CHOOSE_BEST_MODEL,
        |ctx: &TaskContext| {
            let mut scores = Vec::with_capacity(MODELS.len());
            for model in MODELS {
                let score: u32 = ctx.pull(&training_task_id(model))?;
                scores.push((model.to_string(), score));
            }

            // choose_best only returns None for an empty slice
            let (model, score) = choose_best(&scores)
                .ok_or_else(|| TaskError::Failed("no training scores published".to_string()))?;

            let verdict = if score > ACCURACY_THRESHOLD {
                // The winning name is only published when it actually won
                ctx.push(BEST_MODEL_KEY, &model)?;
                info!("Best model: {} (score {}, accurate)", model, score);
                Verdict::Accurate
            } else {
                info!("Best model: {} (score {}, below threshold)", model, score);
                Verdict::Inaccurate
            };

            Ok(verdict.outcome())
        },
        vec![
            BranchArm::new(Verdict::Accurate.outcome(), IS_ACCURATE),
            BranchArm::new(Verdict::Inaccurate.outcome(), IS_INACCURATE),
        ],
    )
}

fn accurate_task() -> Task {
    Task::action(IS_ACCURATE, |ctx: &TaskContext| {
        let model: String = ctx.pull_keyed(CHOOSE_BEST_MODEL, BEST_MODEL_KEY)?;
        let message = format!("The best model is: {} with high accuracy", model);
        info!("{}", message);
        ctx.push_return(&message)
    })
}

fn inaccurate_task() -> Task {
    Task::action(IS_INACCURATE, |ctx: &TaskContext| {
        let message = "No model met the accuracy threshold".to_string();
        info!("{}", message);
        ctx.push_return(&message)
    })
}

fn summarizer_task() -> Task {
    Task::action(LOG_ACCURATE_MODEL, |ctx: &TaskContext| {
        let best: Option<String> = ctx.try_pull_keyed(CHOOSE_BEST_MODEL, BEST_MODEL_KEY)?;
        let message = match best {
            Some(model) => format!("Accurate Model Selected: Model {}", model),
            None => "No model was accurate enough.".to_string(),
        };
        info!("{}", message);
        ctx.push_return(&message)
    })
    .with_trigger_rule(TriggerRule::NoneFailedMinOneSuccess)
}

/// Builds the model selection workflow with a custom scorer.
///
/// The returned workflow is already validated and topologically sorted.
pub fn build_with_scorer(scorer: Scorer) -> Result<Workflow, WorkflowError> {
    let start_date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or(NaiveDate::MIN);

    let mut workflow =
        Workflow::new("model_selection").with_schedule(Schedule::daily(start_date));

    for model in MODELS {
        workflow.add_task(training_task(model, Arc::clone(&scorer)))?;
    }
    workflow.add_task(selector_task())?;
    workflow.add_task(accurate_task())?;
    workflow.add_task(inaccurate_task())?;
    workflow.add_task(summarizer_task())?;

    for model in MODELS {
        workflow.set_downstream(&training_task_id(model), CHOOSE_BEST_MODEL)?;
    }
    workflow.set_downstream(CHOOSE_BEST_MODEL, IS_ACCURATE)?;
    workflow.set_downstream(CHOOSE_BEST_MODEL, IS_INACCURATE)?;
    workflow.set_downstream(IS_ACCURATE, LOG_ACCURATE_MODEL)?;
    workflow.set_downstream(IS_INACCURATE, LOG_ACCURATE_MODEL)?;

    validate_workflow(&mut workflow)?;
    Ok(workflow)
}

/// Builds the model selection workflow with random scores.
pub fn build_default() -> Result<Workflow, WorkflowError> {
    build_with_scorer(random_scorer())
}
