use metrics::{describe_counter, describe_gauge};

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

/// 1 while this candidate is leading, 0 otherwise.
pub(crate) const ELECTION_STATE: Metric = Metric {
    name: "morava_election_state",
    description: "Leader election state of this candidate (1 = leading, 0 = following)",
};

pub(crate) const ELECTION_ACQUIRED_TOTAL: Metric = Metric {
    name: "morava_election_acquired_total",
    description: "Total number of times this candidate acquired leadership",
};

pub(crate) const ELECTION_RENEW_FAILURES_TOTAL: Metric = Metric {
    name: "morava_election_renew_failures_total",
    description: "Total number of failed lease renewal attempts while leading",
};

/// Registers metric descriptions with the installed metrics recorder.
/// Call once at startup if an exporter is wired in; the engine records
/// values either way.
pub fn describe_metrics() {
    describe_gauge!(ELECTION_STATE.name, ELECTION_STATE.description);
    describe_counter!(
        ELECTION_ACQUIRED_TOTAL.name,
        ELECTION_ACQUIRED_TOTAL.description
    );
    describe_counter!(
        ELECTION_RENEW_FAILURES_TOTAL.name,
        ELECTION_RENEW_FAILURES_TOTAL.description
    );
}
