//! The replicated log: a 1-indexed sequence of entries with a sentinel
//! at index 0 that simplifies boundary checks around "the entry before
//! the first real entry".

use crate::message::{Entry, LogIndex, Term};

#[derive(Debug, Default)]
pub struct Log {
    /// `entries[0]` is the sentinel; `entries[i]` is the entry at
    /// 1-based index `i`.
    entries: Vec<Entry>,
}

impl Log {
    pub fn new() -> Log {
        Log {
            entries: vec![Entry::sentinel()],
        }
    }

    /// Number of real entries plus the sentinel -- equal to the index
    /// of the last real entry.
    pub fn size(&self) -> LogIndex {
        LogIndex((self.entries.len() - 1) as u64)
    }

    /// Entry at 1-based index `i`. `None` if `i` is out of range.
    /// Index 0 returns the sentinel.
    pub fn get(&self, i: LogIndex) -> Option<&Entry> {
        self.entries.get(i.0 as usize)
    }

    pub fn term_at(&self, i: LogIndex) -> Option<Term> {
        self.get(i).map(|e| e.term)
    }

    pub fn last(&self) -> &Entry {
        self.entries.last().expect("sentinel is never removed")
    }

    pub fn last_index(&self) -> LogIndex {
        self.size()
    }

    pub fn last_term(&self) -> Term {
        self.last().term
    }

    /// Append entries at the tail.
    pub fn append(&mut self, mut entries: Vec<Entry>) {
        self.entries.append(&mut entries);
    }

    /// Discard all entries with index >= i. `i` must be >= 1: the
    /// sentinel at index 0 can never be truncated away.
    pub fn truncate_from(&mut self, i: LogIndex) {
        assert!(i.0 >= 1, "cannot truncate the sentinel at index 0");
        self.entries.truncate(i.0 as usize);
    }

    /// Entries with index >= i, in order.
    pub fn slice_from(&self, i: LogIndex) -> Vec<Entry> {
        let start = i.0 as usize;
        if start >= self.entries.len() {
            return Vec::new();
        }
        self.entries[start..].to_vec()
    }

    /// Whether the candidate described by `(last_log_term, last_log_index)`
    /// is at least as up-to-date as this log, per §4.5 RequestVote rule 3.
    pub fn is_candidate_up_to_date(&self, last_log_term: Term, last_log_index: LogIndex) -> bool {
        let my_term = self.last_term();
        match last_log_term.cmp(&my_term) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => last_log_index >= self.last_index(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Operation;

    fn entry(term: u64) -> Entry {
        Entry {
            term: Term(term),
            op: None,
        }
    }

    #[test]
    fn starts_with_only_the_sentinel() {
        let log = Log::new();
        assert_eq!(log.size(), LogIndex(0));
        assert_eq!(log.last().term, Term(0));
        assert!(log.last().op.is_none());
    }

    #[test]
    fn append_grows_size_and_preserves_order() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(1), entry(2)]);
        assert_eq!(log.size(), LogIndex(3));
        assert_eq!(log.get(LogIndex(1)).unwrap().term, Term(1));
        assert_eq!(log.get(LogIndex(3)).unwrap().term, Term(2));
        assert!(log.get(LogIndex(4)).is_none());
    }

    #[test]
    fn truncate_from_discards_suffix_but_keeps_sentinel() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(1), entry(2)]);
        log.truncate_from(LogIndex(2));
        assert_eq!(log.size(), LogIndex(1));
        assert_eq!(log.get(LogIndex(0)).unwrap().term, Term(0));
    }

    #[test]
    fn slice_from_returns_tail() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(2), entry(3)]);
        let tail = log.slice_from(LogIndex(2));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].term, Term(2));
    }

    #[test]
    fn up_to_date_rule_prefers_higher_term_then_longer_log() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(1)]);
        assert!(log.is_candidate_up_to_date(Term(2), LogIndex(0)));
        assert!(!log.is_candidate_up_to_date(Term(0), LogIndex(99)));
        assert!(log.is_candidate_up_to_date(Term(1), LogIndex(2)));
        assert!(!log.is_candidate_up_to_date(Term(1), LogIndex(1)));
    }

    #[test]
    fn real_entries_can_carry_client_operations() {
        let mut log = Log::new();
        log.append(vec![Entry {
            term: Term(1),
            op: Some(Operation::Write {
                key: serde_json::json!("x"),
                value: serde_json::json!(1),
                msg_id: 1,
                client: "c1".into(),
            }),
        }]);
        assert!(log.get(LogIndex(1)).unwrap().op.is_some());
    }
}
