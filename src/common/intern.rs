// String interning pool. Shared by the compiler (string/identifier
// constants) and the VM (runtime concatenation), owned by the VM as an
// explicit aggregate rather than reached through process-global state
// (spec 5: "Implementations should encapsulate these as an owned
// aggregate rather than true globals").

use std::rc::Rc;

use crate::common::table::Table;
use crate::common::value::{fnv1a_hash, ObjString};

#[derive(Default)]
pub struct Interner {
    strings: Table,
}

impl Interner {
    pub fn new() -> Interner {
        Interner { strings: Table::new() }
    }

    /// Returns the unique interned string for `chars`, allocating a new one
    /// only if no equal-content string exists yet.
    pub fn intern(&mut self, chars: String) -> Rc<ObjString> {
        let hash = fnv1a_hash(chars.as_bytes());
        if let Some(existing) = self.strings.find_string(&chars, hash) {
            return existing;
        }
        let interned = Rc::new(ObjString { chars, hash });
        self.strings.set(interned.clone(), crate::common::value::Value::Nil);
        interned
    }
}
