//! Execution Timeline
//!
//! Records task lifecycle events during a run for timing reports and an
//! ASCII Gantt chart of the run.

use std::collections::HashMap;
use std::time::Instant;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Task started executing
    Started,
    /// Task completed successfully
    Succeeded,
    /// Task failed
    Failed,
    /// Task was skipped without executing
    Skipped,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// ID of the task
    pub task_id: String,
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a task.
    pub fn add_event(&mut self, task_id: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            task_id: task_id.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Returns executed-task durations in milliseconds.
    ///
    /// Skipped tasks never start, so they have no duration.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        let mut starts: HashMap<String, u128> = HashMap::new();
        let mut durations: HashMap<String, u128> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    starts.insert(event.task_id.clone(), elapsed);
                }
                EventType::Succeeded | EventType::Failed => {
                    if let Some(start) = starts.get(&event.task_id) {
                        durations.insert(event.task_id.clone(), elapsed - start);
                    }
                }
                EventType::Skipped => {}
            }
        }

        durations
    }

    /// Generates an ASCII Gantt chart of the run.
    ///
    /// Each executed task is shown as a bar relative to the total run
    /// time; skipped tasks are listed without a bar.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut task_times: HashMap<String, (u128, u128)> = HashMap::new();
        let mut skipped: Vec<String> = Vec::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    task_times
                        .entry(event.task_id.clone())
                        .or_insert((elapsed, 0))
                        .0 = elapsed;
                }
                EventType::Succeeded | EventType::Failed => {
                    if let Some(times) = task_times.get_mut(&event.task_id) {
                        times.1 = elapsed;
                    }
                }
                EventType::Skipped => skipped.push(event.task_id.clone()),
            }
        }

        let mut sorted_tasks: Vec<_> = task_times.into_iter().collect();
        sorted_tasks.sort_by_key(|(_, (start, _))| *start);

        for (task_id, (start, end)) in sorted_tasks {
            if end > start {
                let start_pos = (start as f64 * scale) as usize;
                let duration = ((end - start) as f64 * scale).max(1.0) as usize;

                let mut bar = " ".repeat(start_pos);
                bar.push_str(&"#".repeat(duration));

                output.push_str(&format!(
                    "{:20} |{}| ({} ms)\n",
                    truncate(&task_id, 20),
                    bar,
                    end - start
                ));
            }
        }

        for task_id in skipped {
            output.push_str(&format!("{:20} (skipped)\n", truncate(&task_id, 20)));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.get_events().is_empty());
    }

    #[test]
    fn test_add_events() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("training_model_A", EventType::Started);
        timeline.add_event("training_model_A", EventType::Succeeded);

        assert_eq!(timeline.get_events().len(), 2);
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("t", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("t", EventType::Succeeded);

        let durations = timeline.get_durations();
        assert!(*durations.get("t").unwrap() >= 30);
    }

    #[test]
    fn test_skipped_task_has_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("is_inaccurate", EventType::Skipped);

        assert!(timeline.get_durations().is_empty());
    }

    #[test]
    fn test_gantt_chart_lists_skipped() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("is_accurate", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("is_accurate", EventType::Succeeded);
        timeline.add_event("is_inaccurate", EventType::Skipped);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("is_accurate"));
        assert!(chart.contains("(skipped)"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_failed_event_closes_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("t", EventType::Started);
        thread::sleep(Duration::from_millis(10));
        timeline.add_event("t", EventType::Failed);

        assert!(timeline.get_durations().contains_key("t"));
    }

    #[test]
    fn test_elapsed() {
        let timeline = ExecutionTimeline::new();
        thread::sleep(Duration::from_millis(20));
        assert!(timeline.elapsed().as_millis() >= 20);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short     ");
        assert_eq!(truncate("a_rather_long_task_id", 10), "a_rathe...");
    }

    #[test]
    fn test_timeline_default() {
        let timeline = ExecutionTimeline::default();
        assert!(timeline.get_events().is_empty());
    }
}
