pub(crate) mod attempt_clock;
pub(crate) mod conditions;
pub(crate) mod grading;
pub(crate) mod graph;
pub(crate) mod progression;
pub(crate) mod storage;
pub(crate) mod submission_rules;
