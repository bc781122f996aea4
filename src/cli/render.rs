use console::{style, StyledObject};

use crate::core::events::PanelEvent;
use crate::core::types::{
    or_placeholder, EnvironmentRecord, HealthState, HealthStatus, Namespace, StatusPill,
    StatusReport,
};
use crate::resources::ResourceView;

/// Turns core events into terminal text. Holds no state of its own.
pub struct Renderer;

impl Renderer {
    pub fn render(event: &PanelEvent) -> String {
        match event {
            PanelEvent::HealthChanged(state) => Self::health(state),
            PanelEvent::ResourceSnapshotUpdated(view) => Self::resources(view),
            PanelEvent::EnvironmentListUpdated(records) => Self::environments(records),
            PanelEvent::StatusUpdated {
                namespace,
                report,
                reveal,
            } => Self::status(namespace, report, *reveal),
            PanelEvent::OperationFailed { message } => {
                format!("{} {}", style("✗").red().bold(), style(message).red())
            }
            PanelEvent::Notice(message) => format!("{} {}", style("✓").green().bold(), message),
        }
    }

    pub fn print(event: &PanelEvent) {
        println!("{}", Self::render(event));
    }

    fn health(state: &HealthState) -> String {
        let dot = match state.status {
            HealthStatus::Healthy => style("●").green(),
            HealthStatus::Unreachable => style("●").red(),
            HealthStatus::Unknown => style("●").yellow(),
        };
        format!("{} {}", dot, state.reason)
    }

    fn resources(view: &ResourceView) -> String {
        format!(
            "{} cpu {} cores free (selected {}/{}) · memory {} MB free (selected {}/{})",
            style("resources").bold(),
            or_placeholder(view.cpu_available),
            view.cpu.selected,
            view.cpu.bound,
            or_placeholder(view.memory_available_mb),
            view.memory.selected,
            view.memory.bound,
        )
    }

    fn environments(records: &[EnvironmentRecord]) -> String {
        if records.is_empty() {
            return style("no environments").dim().to_string();
        }

        let mut lines = vec![format!(
            "{:<20} {:<12} {:>8} {:>6} {:>8}  {:<24} {}",
            "NAMESPACE", "STATUS", "PID", "CPU", "MEM(MB)", "UNIT", "CREATED"
        )];
        for record in records {
            let status = record.last_status.to_string();
            lines.push(format!(
                "{:<20} {:<12} {:>8} {:>6} {:>8}  {:<24} {}",
                record.namespace,
                pill(record.last_status.pill(), &format!("{:<12}", status)),
                or_placeholder(record.last_pid),
                or_placeholder(record.cpu),
                or_placeholder(record.memory),
                or_placeholder(record.unit_name.as_deref()),
                or_placeholder(record.created_at.as_deref()),
            ));
        }
        lines.join("\n")
    }

    fn status(namespace: &Namespace, report: &StatusReport, reveal: bool) -> String {
        let cards = format!(
            "state: {}  cpu: {}  memory: {}  unit: {}  pid: {}",
            pill(
                StatusPill::for_status(report.status.as_deref().unwrap_or_default()),
                &or_placeholder(report.status.as_deref()),
            ),
            or_placeholder(report.cpu_requested),
            or_placeholder(report.memory_requested),
            or_placeholder(report.unit.as_deref()),
            or_placeholder(report.pid),
        );
        if !reveal {
            return format!("{} {}", style(namespace).dim(), cards);
        }

        let raw = serde_json::to_string_pretty(&report.raw).unwrap_or_default();
        format!("{}\n{}\n{}", style(format!("status of {}", namespace)).bold(), cards, style(raw).dim())
    }
}

fn pill(class: StatusPill, text: &str) -> StyledObject<String> {
    let styled = style(text.to_string());
    match class {
        StatusPill::Positive => styled.green(),
        StatusPill::Warning => styled.yellow(),
        StatusPill::Negative => styled.red(),
        StatusPill::Neutral => styled.dim(),
    }
}
