//! Store key layout.

/// Formats the logical keys shared by every node.
///
/// Keys are unprefixed here; the store backend applies the deployment
/// namespace.
pub struct KeySpace;

impl KeySpace {
    /// Key holding the current leader's node id.
    pub const LEADER: &'static str = "master:node";

    /// Lock namespace used for job state transitions.
    pub const JOB_LOCK_KIND: &'static str = "cron";

    /// `lock:{kind}:{id}`
    pub fn lock(kind: &str, id: &str) -> String {
        format!("lock:{}:{}", kind, id)
    }

    /// `cron:{code}`
    pub fn job_state(code: &str) -> String {
        format!("cron:{}", code)
    }

    /// Lock key guarding the state transitions of a job.
    pub fn job_lock(code: &str) -> String {
        Self::lock(Self::JOB_LOCK_KIND, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(KeySpace::lock("wallet", "42"), "lock:wallet:42");
        assert_eq!(KeySpace::job_state("sync"), "cron:sync");
        assert_eq!(KeySpace::job_lock("sync"), "lock:cron:sync");
        assert_eq!(KeySpace::LEADER, "master:node");
    }
}
