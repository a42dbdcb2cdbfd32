//! Capability discovery and the model-facing tool declarations.

use std::collections::HashSet;

use mcp::{CapabilitySet, Connector, ServerSession};
use tracing::{debug, warn};

use crate::model::FunctionDeclaration;
use crate::registry::ConnectionRegistry;

/// List tools, prompts and resources of one server concurrently.
///
/// Each listing is independent: a failed one is logged and yields an empty
/// list for its kind without affecting the other two.
pub async fn discover<S: ServerSession>(server_id: &str, session: &S) -> CapabilitySet {
    let (tools, prompts, resources) = tokio::join!(
        session.list_tools(),
        session.list_prompts(),
        session.list_resources(),
    );

    CapabilitySet {
        tools: best_effort(server_id, "tools", tools),
        prompts: best_effort(server_id, "prompts", prompts),
        resources: best_effort(server_id, "resources", resources),
    }
}

fn best_effort<T>(server_id: &str, kind: &str, listing: mcp::Result<Vec<T>>) -> Vec<T> {
    match listing {
        Ok(items) => {
            debug!(server_id, kind, count = items.len(), "listed capabilities");
            items
        }
        Err(e) => {
            warn!(server_id, kind, error = %e, "capability listing failed; treating as empty");
            Vec::new()
        }
    }
}

impl<C: Connector> ConnectionRegistry<C> {
    /// Declarations for every tool on every connected server.
    ///
    /// Follows registry insertion order. When two servers expose the same
    /// name only the first declaration is kept, matching dispatch.
    pub fn all_function_declarations(&self) -> Vec<FunctionDeclaration> {
        let mut seen = HashSet::new();
        self.connected_capabilities()
            .iter()
            .flat_map(|capabilities| capabilities.tools.iter())
            .filter(|tool| seen.insert(tool.name.clone()))
            .map(FunctionDeclaration::from)
            .collect()
    }
}
