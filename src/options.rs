//! Search options

use std::time::Duration;

use crate::controls::Control;

/// Default number of referral hops followed before giving up
pub const DEFAULT_HOP_LIMIT: u32 = 10;

/// Client-side constraints of a search operation
#[derive(Clone, Debug, PartialEq)]
pub struct SearchConstraints {
    pub(crate) batch_size: u32,
    pub(crate) referral_following: bool,
    pub(crate) hop_limit: u32,
    pub(crate) time_limit: Option<Duration>,
    pub(crate) controls: Vec<Control>,
}

impl Default for SearchConstraints {
    fn default() -> Self {
        Self {
            batch_size: 1,
            referral_following: false,
            hop_limit: DEFAULT_HOP_LIMIT,
            time_limit: None,
            controls: Vec::new(),
        }
    }
}

impl SearchConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries buffered per fetch. Zero means no limit.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Chase referrals and continuation references transparently
    pub fn referral_following(mut self, flag: bool) -> Self {
        self.referral_following = flag;
        self
    }

    /// Maximum number of referral hops
    pub fn hop_limit(mut self, hop_limit: u32) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    /// Maximum time to wait for each response
    pub fn time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    /// Add a request control
    pub fn control<C: Into<Control>>(mut self, control: C) -> Self {
        self.controls.push(control.into());
        self
    }

    /// Entry quota of one fetch, with zero mapped to an unreachable sentinel
    pub fn effective_batch_size(&self) -> u32 {
        if self.batch_size == 0 {
            u32::MAX
        } else {
            self.batch_size
        }
    }

    pub fn follows_referrals(&self) -> bool {
        self.referral_following
    }

    pub fn max_hops(&self) -> u32 {
        self.hop_limit
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.time_limit
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::SimplePagedResultsControl;

    #[test]
    fn test_defaults() {
        let constraints = SearchConstraints::new();
        assert_eq!(constraints.effective_batch_size(), 1);
        assert!(!constraints.follows_referrals());
        assert_eq!(constraints.max_hops(), DEFAULT_HOP_LIMIT);
        assert!(constraints.response_timeout().is_none());
        assert!(constraints.controls().is_empty());
    }

    #[test]
    fn test_unbounded_batch() {
        let constraints = SearchConstraints::new()
            .batch_size(0)
            .control(SimplePagedResultsControl::new(100));
        assert_eq!(constraints.effective_batch_size(), u32::MAX);
        assert_eq!(constraints.controls().len(), 1);
    }
}
