//! In-memory case storage and watcher fan-out.
//!
//! Each case sits behind its own mutex; the map lock is only held long
//! enough to find or insert a handle. Mutations go through
//! [`CaseLedger::update`], which works on a copy and commits it only when
//! the closure succeeds, so a rejected operation leaves the case exactly
//! as it was.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use safe_return_case_models::{
    Case, CaseFilter, CaseId, CaseQuery, CaseSort, SearchResult, SortDirection, SortField, UserId,
};
use safe_return_events::{Notification, Outbound, Outbox};
use safe_return_geometry::within_radius;

use crate::CaseError;

type CaseHandle = Arc<Mutex<Case>>;

/// Keyed store of cases.
pub struct CaseLedger {
    cases: RwLock<BTreeMap<CaseId, CaseHandle>>,
    outbox: Outbox,
}

impl CaseLedger {
    /// Creates an empty ledger that sends watcher notifications to
    /// `outbox`.
    #[must_use]
    pub fn new(outbox: Outbox) -> Self {
        Self {
            cases: RwLock::new(BTreeMap::new()),
            outbox,
        }
    }

    /// A copy of the case.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] if there is no such case
    /// * [`CaseError::Poisoned`] if its lock is poisoned
    pub fn get(&self, case_id: CaseId) -> Result<Case, CaseError> {
        let handle = self.handle(case_id)?;
        let case = lock(case_id, &handle)?;
        Ok(case.clone())
    }

    /// Inserts or replaces a case. Replacing also clears a poisoned lock,
    /// since the whole record is overwritten. Returns `true` if the case
    /// was new.
    pub fn upsert(&self, case: Case) -> bool {
        let mut cases = self.cases.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = cases.get(&case.id) {
            let handle = Arc::clone(handle);
            drop(cases);
            let mut current = handle.lock().unwrap_or_else(PoisonError::into_inner);
            *current = case;
            drop(current);
            handle.clear_poison();
            false
        } else {
            cases.insert(case.id, Arc::new(Mutex::new(case)));
            true
        }
    }

    /// Number of stored cases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the ledger holds no cases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filters, then sorts, then paginates.
    ///
    /// Cases whose lock is poisoned are skipped.
    #[must_use]
    pub fn search(&self, query: &CaseQuery) -> SearchResult {
        let mut matches: Vec<Case> = self
            .handles()
            .into_iter()
            .filter_map(|(_, handle)| {
                let case = handle.lock().ok()?;
                matches_filter(&case, &query.filter).then(|| case.clone())
            })
            .collect();

        matches.sort_by(|a, b| compare(a, b, query.sort));

        let total_count = matches.len();
        let cases: Vec<Case> = matches
            .into_iter()
            .skip(query.page.offset)
            .take(query.page.limit)
            .collect();
        let has_more = query.page.offset.saturating_add(cases.len()) < total_count;

        SearchResult {
            cases,
            total_count,
            has_more,
        }
    }

    /// Adds a watcher. Returns `false` if they were already watching.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] if there is no such case
    /// * [`CaseError::Poisoned`] if its lock is poisoned
    pub fn add_watcher(&self, case_id: CaseId, user_id: &str) -> Result<bool, CaseError> {
        let handle = self.handle(case_id)?;
        let mut case = lock(case_id, &handle)?;
        Ok(case.watchers.insert(user_id.to_string()))
    }

    /// Removes a watcher. Returns `false` if they were not watching.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] if there is no such case
    /// * [`CaseError::Poisoned`] if its lock is poisoned
    pub fn remove_watcher(&self, case_id: CaseId, user_id: &str) -> Result<bool, CaseError> {
        let handle = self.handle(case_id)?;
        let mut case = lock(case_id, &handle)?;
        Ok(case.watchers.remove(user_id))
    }

    /// Current watchers of a case.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] if there is no such case
    /// * [`CaseError::Poisoned`] if its lock is poisoned
    pub fn watchers(&self, case_id: CaseId) -> Result<BTreeSet<UserId>, CaseError> {
        let handle = self.handle(case_id)?;
        let case = lock(case_id, &handle)?;
        Ok(case.watchers.clone())
    }

    /// Queues one notification per watcher. Returns how many were queued.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] if there is no such case
    /// * [`CaseError::Poisoned`] if its lock is poisoned
    pub fn notify_watchers(
        &self,
        case_id: CaseId,
        event_type: &str,
        message: &str,
        payload: &serde_json::Value,
    ) -> Result<usize, CaseError> {
        let watchers = self.watchers(case_id)?;
        let count = watchers.len();
        self.outbox
            .send_all(watchers.into_iter().map(|user_id| {
                Outbound::Notify(Notification {
                    user_id,
                    case_id: Some(case_id),
                    event_type: event_type.to_string(),
                    message: message.to_string(),
                    payload: payload.clone(),
                })
            }));
        log::debug!("Queued {count} {event_type} notifications for case {case_id}");
        Ok(count)
    }

    /// Number of non-closed cases filed by `reporter_id`.
    #[must_use]
    pub fn open_count_for_reporter(&self, reporter_id: &str) -> usize {
        self.count_where(|case| !case.is_closed() && case.reporter_id == reporter_id)
    }

    /// IDs of non-closed cases linked to a tracked subject.
    #[must_use]
    pub fn open_cases_for_subject(&self, subject_id: &str) -> Vec<CaseId> {
        self.handles()
            .into_iter()
            .filter(|(_, handle)| {
                handle.lock().is_ok_and(|case| {
                    !case.is_closed() && case.monitored_subject_id.as_deref() == Some(subject_id)
                })
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Applies `f` to a copy of the case and commits the copy if `f`
    /// succeeds. Returns `f`'s output and the committed case.
    pub(crate) fn update<T>(
        &self,
        case_id: CaseId,
        f: impl FnOnce(&mut Case) -> Result<T, CaseError>,
    ) -> Result<(T, Case), CaseError> {
        let handle = self.handle(case_id)?;
        update_locked(case_id, &handle, f)
    }

    /// Snapshot of every case handle. The map lock is released before
    /// returning.
    pub(crate) fn handles(&self) -> Vec<(CaseId, CaseHandle)> {
        self.cases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }

    fn handle(&self, case_id: CaseId) -> Result<CaseHandle, CaseError> {
        self.cases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&case_id)
            .cloned()
            .ok_or(CaseError::NotFound { case_id })
    }

    fn count_where(&self, predicate: impl Fn(&Case) -> bool) -> usize {
        self.handles()
            .into_iter()
            .filter(|(_, handle)| handle.lock().is_ok_and(|case| predicate(&case)))
            .count()
    }
}

/// Same as [`CaseLedger::update`] for a handle the caller already holds.
pub(crate) fn update_locked<T>(
    case_id: CaseId,
    handle: &Mutex<Case>,
    f: impl FnOnce(&mut Case) -> Result<T, CaseError>,
) -> Result<(T, Case), CaseError> {
    let mut case = lock(case_id, handle)?;
    let mut draft = case.clone();
    let output = f(&mut draft)?;
    *case = draft;
    Ok((output, case.clone()))
}

fn lock(case_id: CaseId, handle: &Mutex<Case>) -> Result<MutexGuard<'_, Case>, CaseError> {
    handle.lock().map_err(|_| CaseError::Poisoned { case_id })
}

fn matches_filter(case: &Case, filter: &CaseFilter) -> bool {
    filter.status.is_none_or(|s| case.status == s)
        && filter.priority.is_none_or(|p| case.priority == p)
        && filter
            .reporter_id
            .as_deref()
            .is_none_or(|r| case.reporter_id == r)
        && filter.bounding_circle.is_none_or(|circle| {
            within_radius(
                case.last_known_location,
                circle.center,
                circle.radius_meters,
            )
        })
        && filter
            .date_range
            .is_none_or(|range| range.contains(case.created_at))
        && filter.category.is_none_or(|c| case.category == c)
        && filter.risk_level.is_none_or(|r| case.risk_level == r)
}

fn compare(a: &Case, b: &Case, sort: CaseSort) -> Ordering {
    let primary = match sort.field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::RiskLevel => a.risk_level.cmp(&b.risk_level),
    };
    let ordering = primary
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id));
    match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}
