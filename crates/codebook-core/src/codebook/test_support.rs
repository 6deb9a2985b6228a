use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::codebook::Codebook;
use crate::models::{CodeId, Timestamp};
use crate::store::memory::InMemoryStore;

pub(crate) fn ymd(y: i32, m: u32, d: u32) -> Timestamp {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// An empty, uncached codebook on a fresh in-memory store.
pub(crate) fn setup() -> (Arc<InMemoryStore>, Codebook) {
    let store = Arc::new(InMemoryStore::new());
    let codebook = Codebook::create(store.clone(), 1, "test").unwrap();
    (store, codebook)
}

/// One code per label, labelled in language 1.
pub(crate) fn labelled_codes<const N: usize>(
    store: &InMemoryStore,
    labels: [&str; N],
) -> [CodeId; N] {
    labels.map(|label| store.create_labelled_code(label, 1).id)
}
