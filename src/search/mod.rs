//! Text search collaborators: reference documents and platform logs.
//!
//! Both are stateless helpers with no connection to the machine-mode
//! client. They back the `docs` and `logs` subcommands of `csend-ctl`.

pub mod docs;
pub mod logs;

/// Width of the `=` and `-` rules in rendered reports.
pub(crate) const RULE_WIDTH: usize = 60;

pub(crate) fn rule(ch: char) -> String {
    ch.to_string().repeat(RULE_WIDTH)
}
