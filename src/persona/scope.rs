use std::marker::PhantomData;

use super::{tls, Persona};

/// Keeps a persona active on the current thread.
///
/// Scopes must be dropped in reverse order of creation; releasing one out of
/// order is fatal. The guard is neither `Send` nor `Sync`: the activation
/// belongs to the thread that created it.
#[must_use = "the persona is released as soon as the scope is dropped"]
pub struct PersonaScope {
    persona: Persona,
    _not_send: PhantomData<*const ()>,
}

impl PersonaScope {
    #[track_caller]
    pub(super) fn new(persona: &Persona) -> Self {
        tls::push(persona);
        Self {
            persona: persona.clone(),
            _not_send: PhantomData,
        }
    }

    /// The persona this scope activated.
    #[must_use]
    pub fn persona(&self) -> &Persona {
        &self.persona
    }
}

impl Drop for PersonaScope {
    fn drop(&mut self) {
        tls::pop(self.persona.id());
    }
}

impl std::fmt::Debug for PersonaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonaScope")
            .field("persona", &self.persona.id())
            .finish()
    }
}
