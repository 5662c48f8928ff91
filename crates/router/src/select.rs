// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent selection.
//!
//! Weight is `job_count / cpu_count`: a 16-core agent with four jobs beats
//! a 2-core agent with one. The router only refuses when even the best
//! agent is past the overload line; the client retries later.

use std::collections::HashMap;

use bf_registry::BuildAgent;
use thiserror::Error;

/// An agent past this many jobs is not worth sending more work to, no
/// matter how it compares to the others.
const OVERLOAD_JOB_COUNT: u32 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no running build agents")]
    NoAgents,

    #[error("all build agents are overloaded")]
    Overloaded,
}

fn weight(agent: &BuildAgent) -> f64 {
    if agent.cpu_count == 0 {
        // Malformed entry; sort it last.
        return f64::INFINITY;
    }
    f64::from(agent.job_count) / f64::from(agent.cpu_count)
}

/// Pick the least-loaded agent from a registry snapshot.
pub fn select_agent(agents: &HashMap<String, BuildAgent>) -> Result<&BuildAgent, SelectError> {
    let mut candidates: Vec<&BuildAgent> = agents.values().collect();
    if candidates.is_empty() {
        return Err(SelectError::NoAgents);
    }
    candidates.sort_by(|a, b| {
        weight(a).total_cmp(&weight(b)).then_with(|| a.address.cmp(&b.address))
    });

    let best = candidates[0];
    if best.job_count > OVERLOAD_JOB_COUNT {
        return Err(SelectError::Overloaded);
    }
    Ok(best)
}

#[cfg(test)]
#[path = "select_tests.rs"]
mod tests;
