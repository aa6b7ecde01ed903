//! Result presentation.
//!
//! Detail records render to plain text, one block per record. Rendering a
//! collected set sorts by component id first so the output is identical for
//! any delivery order; nested per-item lists are sorted by their ids for the
//! same reason. Error lists inside a record keep their reported order.

use std::fmt::Write as _;

use crate::aggregator::{AggregateOutcome, Completion, DetailRecord};
use crate::messages::{
    ComponentValidationDetail, RouterLinkDetail, RouterLinkDetails, RouterTerminatorDetail,
    RouterTerminatorsDetails, TerminatorDetail,
};

/// Text rendering for one detail record.
pub trait RenderDetail {
    /// Append this record's report to `out`, ending with a newline.
    fn render(&self, out: &mut String);
}

impl RenderDetail for TerminatorDetail {
    fn render(&self, out: &mut String) {
        let _ = write!(
            out,
            "terminator {} state={}{} service={} ({}) router={} ({}) binding={} address={} created={}",
            self.terminator_id,
            self.state.label(),
            if self.fixed { " (fixed)" } else { "" },
            self.service_name,
            self.service_id,
            self.router_name,
            self.router_id,
            self.binding,
            self.address,
            self.create_date,
        );
        if !self.detail.is_empty() {
            let _ = write!(out, " detail={}", self.detail);
        }
        out.push('\n');
    }
}

impl RenderDetail for RouterLinkDetails {
    fn render(&self, out: &mut String) {
        let _ = write!(
            out,
            "router {} ({}) links={} valid={}",
            self.router_id,
            self.router_name,
            self.link_details.len(),
            self.is_valid(),
        );
        if !self.message.is_empty() {
            let _ = write!(out, " message={}", self.message);
        }
        out.push('\n');

        let mut links: Vec<&RouterLinkDetail> = self.link_details.iter().collect();
        links.sort_by(|a, b| a.link_id.cmp(&b.link_id));
        for link in links {
            let _ = writeln!(
                out,
                "  link {} ctrl={} router={} dest={} dest-connected={} dialed={} valid={}",
                link.link_id,
                link.ctrl_state.label(),
                link.router_state.label(),
                link.dest_router_id,
                link.dest_connected,
                link.dialed,
                link.is_valid,
            );
        }
    }
}

impl RenderDetail for ComponentValidationDetail {
    fn render(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "{} {} ({}) valid={}",
            self.component_type,
            self.component_id,
            self.component_name,
            self.is_valid(),
        );
        for error in &self.errors {
            let _ = writeln!(out, "  error: {error}");
        }
    }
}

impl RenderDetail for RouterTerminatorsDetails {
    fn render(&self, out: &mut String) {
        let _ = write!(
            out,
            "router {} ({}) terminators={} valid={}",
            self.router_id,
            self.router_name,
            self.details.len(),
            self.is_valid(),
        );
        if !self.message.is_empty() {
            let _ = write!(out, " message={}", self.message);
        }
        out.push('\n');

        let mut entries: Vec<&RouterTerminatorDetail> = self.details.iter().collect();
        entries.sort_by(|a, b| a.terminator_id.cmp(&b.terminator_id));
        for entry in entries {
            let _ = writeln!(
                out,
                "  terminator {} ctrl={} router={} active={} created={} last-attempt={} valid={}",
                entry.terminator_id,
                entry.ctrl_state,
                entry.router_state,
                entry.operation_active,
                entry.create_time,
                entry.last_attempt,
                entry.is_valid,
            );
        }
    }
}

/// Render a collected set of records: invalid ones, plus valid ones when
/// `include_valid` is set, sorted by component id.
pub fn render_all<D>(records: &[D], include_valid: bool) -> String
where
    D: DetailRecord + RenderDetail,
{
    let mut selected: Vec<&D> = records
        .iter()
        .filter(|record| include_valid || !record.is_valid())
        .collect();
    selected.sort_by(|a, b| a.component_id().cmp(b.component_id()));

    let mut out = String::new();
    for record in selected {
        record.render(&mut out);
    }
    out
}

/// One-line aggregation summary.
pub fn render_summary(label: &str, outcome: &AggregateOutcome) -> String {
    let mut out = format!(
        "{}: {} of {} results received, {} errors",
        label, outcome.received, outcome.expected, outcome.error_count,
    );
    match outcome.completion {
        Completion::Completed => {}
        Completion::ClosedEarly => out.push_str(" (channel closed early, coverage incomplete)"),
        Completion::DeadlineExceeded => out.push_str(" (deadline reached, coverage incomplete)"),
    }
    out
}

/// Process exit status for a finished aggregation: zero iff no errors were
/// found, for complete and incomplete coverage alike.
pub fn exit_code(outcome: &AggregateOutcome) -> i32 {
    if outcome.error_count == 0 { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ComponentType;

    fn detail(id: &str, valid: bool, errors: &[&str]) -> ComponentValidationDetail {
        ComponentValidationDetail {
            component_type: ComponentType::Router,
            component_id: id.to_string(),
            component_name: format!("router-{id}"),
            validate_success: valid,
            errors: errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn test_render_all_is_order_independent() {
        let forward = vec![
            detail("a", true, &[]),
            detail("b", false, &["bad cert"]),
            detail("c", true, &[]),
        ];
        let reversed: Vec<_> = forward.iter().cloned().rev().collect();

        assert_eq!(render_all(&forward, true), render_all(&reversed, true));
        assert_eq!(render_all(&forward, false), render_all(&reversed, false));
    }

    #[test]
    fn test_render_all_filters_valid_records() {
        let records = vec![
            detail("a", true, &[]),
            detail("b", false, &["bad cert"]),
            detail("c", true, &[]),
        ];

        let failures_only = render_all(&records, false);
        assert!(failures_only.contains("router b"));
        assert!(!failures_only.contains("router a"));
        assert!(failures_only.contains("error: bad cert"));

        let everything = render_all(&records, true);
        assert!(everything.contains("router a"));
        assert!(everything.contains("router b"));
        assert!(everything.contains("router c"));
    }

    #[test]
    fn test_link_details_render_sorted() {
        let link = |id: &str| RouterLinkDetail {
            link_id: id.to_string(),
            ctrl_state: crate::messages::LinkState::Established,
            router_state: crate::messages::LinkState::Unknown,
            dest_router_id: "r9".to_string(),
            dest_connected: false,
            dialed: true,
            is_valid: false,
        };
        let details = RouterLinkDetails {
            router_id: "r1".to_string(),
            router_name: "router-1".to_string(),
            validate_success: true,
            message: String::new(),
            link_details: vec![link("l2"), link("l1")],
        };

        let mut out = String::new();
        details.render(&mut out);
        let l1 = out.find("link l1").expect("l1 rendered");
        let l2 = out.find("link l2").expect("l2 rendered");
        assert!(l1 < l2);
    }

    #[test]
    fn test_summary_and_exit_codes() {
        let outcome = AggregateOutcome {
            expected: 3,
            received: 3,
            error_count: 1,
            completion: Completion::Completed,
        };
        assert_eq!(
            render_summary("terminators", &outcome),
            "terminators: 3 of 3 results received, 1 errors"
        );
        assert_eq!(exit_code(&outcome), 1);

        let partial = AggregateOutcome {
            expected: 5,
            received: 2,
            error_count: 0,
            completion: Completion::ClosedEarly,
        };
        assert!(render_summary("router-links", &partial).contains("channel closed early"));
        assert_eq!(exit_code(&partial), 0);

        let expired = AggregateOutcome {
            expected: 5,
            received: 4,
            error_count: 0,
            completion: Completion::DeadlineExceeded,
        };
        assert!(render_summary("router-links", &expired).contains("deadline reached"));
        assert_eq!(exit_code(&expired), 0);
    }
}
