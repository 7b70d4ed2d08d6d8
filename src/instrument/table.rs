//! Live instrument instances, keyed by the alias given in MAKE.

use super::connection::ConnectionSpec;
use super::descriptor::CommandDescriptor;
use super::Instrument;
use crate::error::{AppResult, DispatchError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One instrument created by a MAKE line.
pub struct LiveInstance {
    alias: String,
    display_name: String,
    connection: ConnectionSpec,
    handler: Box<dyn Instrument>,
    reflected: Vec<CommandDescriptor>,
    generic: Arc<Vec<CommandDescriptor>>,
    opened: bool,
}

impl LiveInstance {
    /// Wrap a handler. `opened` is true when its connection was opened.
    pub fn new(
        alias: impl Into<String>,
        display_name: impl Into<String>,
        connection: ConnectionSpec,
        handler: Box<dyn Instrument>,
        generic: Arc<Vec<CommandDescriptor>>,
        opened: bool,
    ) -> Self {
        let reflected = handler.list_commands();
        Self {
            alias: alias.into(),
            display_name: display_name.into(),
            connection,
            handler,
            reflected,
            generic,
            opened,
        }
    }

    /// The script alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Registry display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The handler.
    pub fn handler_mut(&mut self) -> &mut dyn Instrument {
        self.handler.as_mut()
    }

    /// Reflected commands followed by generic ones.
    pub fn commands(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.reflected.iter().chain(self.generic.iter())
    }

    /// Find the command called `name` (case-sensitive) taking `arity`
    /// arguments.
    pub fn resolve(&self, name: &str, arity: usize) -> AppResult<CommandDescriptor> {
        let named: Vec<&CommandDescriptor> = self.commands().filter(|c| c.name == name).collect();
        if named.is_empty() {
            return Err(DispatchError::UnknownCommand {
                instrument: self.alias.clone(),
                command: name.to_string(),
            });
        }

        let mut matching = named.iter().filter(|c| c.arity() == arity);
        match (matching.next(), matching.next()) {
            (Some(command), None) => Ok((*command).clone()),
            (Some(_), Some(_)) => Err(DispatchError::AmbiguousCommand {
                instrument: self.alias.clone(),
                command: name.to_string(),
                arity,
            }),
            (None, _) => {
                let mut arities: Vec<usize> = named.iter().map(|c| c.arity()).collect();
                arities.sort_unstable();
                arities.dedup();
                let expected: Vec<String> = arities.iter().map(usize::to_string).collect();
                Err(DispatchError::ArityMismatch {
                    command: name.to_string(),
                    expected: expected.join(" or "),
                    found: arity,
                })
            }
        }
    }
}

/// Alias → live instance, in definition order.
#[derive(Default)]
pub struct InstanceTable {
    instances: Vec<LiveInstance>,
}

impl InstanceTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `alias` is taken.
    pub fn contains(&self, alias: &str) -> bool {
        self.instances.iter().any(|i| i.alias == alias)
    }

    /// Add an instance; its alias must be free.
    pub fn insert(&mut self, instance: LiveInstance) -> AppResult<()> {
        if self.contains(&instance.alias) {
            return Err(DispatchError::AliasInUse(instance.alias));
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Look up an alias.
    pub fn get(&self, alias: &str) -> Option<&LiveInstance> {
        self.instances.iter().find(|i| i.alias == alias)
    }

    /// Look up an alias for invocation.
    pub fn get_mut(&mut self, alias: &str) -> Option<&mut LiveInstance> {
        self.instances.iter_mut().find(|i| i.alias == alias)
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Alias → display name.
    pub fn summary(&self) -> BTreeMap<String, String> {
        self.instances
            .iter()
            .map(|i| (i.alias.clone(), i.display_name.clone()))
            .collect()
    }

    /// Close every opened instance, newest first, then empty the table.
    /// Close failures are logged and do not stop the remaining closes.
    /// Returns the number of failures.
    pub async fn close_all(&mut self) -> usize {
        let mut failures = 0;
        while let Some(mut instance) = self.instances.pop() {
            if !instance.opened {
                continue;
            }
            if let Err(e) = instance.handler.close().await {
                failures += 1;
                tracing::warn!(
                    alias = %instance.alias,
                    instrument = %instance.display_name,
                    connection = %instance.connection,
                    "failed to close instrument: {e:#}"
                );
            }
        }
        failures
    }

    /// Drop every instance without closing.
    pub fn clear(&mut self) {
        self.instances.clear();
    }
}
