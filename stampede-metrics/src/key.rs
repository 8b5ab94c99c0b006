use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Interned string id used for metric names, tag keys and tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<KeyId> for u32 {
    fn from(v: KeyId) -> Self {
        v.0
    }
}

#[derive(Debug, Default)]
struct Table {
    ids: HashMap<Arc<str>, u32, RandomState>,
    strings: Vec<Arc<str>>,
}

/// Append-only string interner. Ids are never reused, so a `KeyId` stays valid for the
/// lifetime of the registry that produced it.
#[derive(Debug, Default)]
pub struct Interner {
    table: RwLock<Table>,
}

impl Interner {
    pub fn intern(&self, s: &str) -> KeyId {
        if let Some(&id) = self.table.read().ids.get(s) {
            return KeyId(id);
        }

        let mut table = self.table.write();
        if let Some(&id) = table.ids.get(s) {
            return KeyId(id);
        }

        let id = u32::try_from(table.strings.len()).unwrap_or(u32::MAX);
        let s: Arc<str> = Arc::from(s);
        table.strings.push(s.clone());
        table.ids.insert(s, id);
        KeyId(id)
    }

    /// Looks a string up without interning it.
    pub fn get(&self, s: &str) -> Option<KeyId> {
        self.table.read().ids.get(s).map(|&id| KeyId(id))
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.table.read().strings.get(id.0 as usize).cloned()
    }
}
