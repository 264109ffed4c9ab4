//! Global and per-agent MCP connection pools.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use warden_core::AgentId;
use warden_policy::PolicyEngine;

use crate::client::McpClient;
use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::DiscoveredTool;
use crate::reconnect::ReconnectingTransport;

/// Deadline for the `initialize` handshake when connecting a server.
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for `tools/list` during discovery.
const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(5);

/// One live server connection: client, config, and tool cache.
pub struct McpConnection {
    config: ServerConfig,
    client: McpClient,
    tools_cache: RwLock<Option<Vec<DiscoveredTool>>>,
    healthy: AtomicBool,
}

impl McpConnection {
    /// Wrap an initialized client.
    #[must_use]
    pub fn new(config: ServerConfig, client: McpClient) -> Self {
        Self {
            config,
            client,
            tools_cache: RwLock::new(None),
            healthy: AtomicBool::new(true),
        }
    }

    /// The connection's server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Structural readiness: present and not marked unhealthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnection")
            .field("server", &self.config.name)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

type AgentPools = HashMap<AgentId, HashMap<String, Arc<McpConnection>>>;

/// Connection pools: one global map plus one map per agent.
///
/// Per-agent configs without a command or URL *alias* the global
/// connection of the same name (shared `Arc`); disconnecting an agent
/// closes only the connections it owns.
pub struct McpManager {
    global: RwLock<HashMap<String, Arc<McpConnection>>>,
    agents: RwLock<AgentPools>,
    policy: Arc<PolicyEngine>,
}

impl McpManager {
    /// Create an empty manager sharing the runtime's policy engine.
    #[must_use]
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self {
            global: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Spawn, initialize, and register global servers.
    ///
    /// Failures are logged per server; the first error is returned
    /// after all configs were attempted.
    ///
    /// # Errors
    ///
    /// Returns the first connection failure encountered.
    pub async fn connect_global_servers(&self, configs: Vec<ServerConfig>) -> McpResult<()> {
        let mut first_error = None;
        for config in configs {
            match connect(&config).await {
                Ok(connection) => {
                    self.global
                        .write()
                        .await
                        .insert(config.name.clone(), Arc::new(connection));
                },
                Err(e) => {
                    warn!(server = %config.name, error = %e, "Global MCP server failed to connect");
                    first_error.get_or_insert(e);
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Connect an agent's servers.
    ///
    /// Reference configs (no command, no URL) alias the global
    /// connection of the same name; anything else gets its own
    /// reconnecting transport, client, and `initialize` handshake
    /// under a 10 s deadline.
    ///
    /// # Errors
    ///
    /// Returns the first failure; successfully connected servers stay
    /// registered.
    pub async fn connect_agent_servers(
        &self,
        agent: &AgentId,
        configs: Vec<ServerConfig>,
    ) -> McpResult<()> {
        for config in configs {
            let connection = if config.is_reference() {
                let global = self.global.read().await;
                Arc::clone(global.get(&config.name).ok_or_else(|| {
                    McpError::UnknownGlobalServer {
                        name: config.name.clone(),
                    }
                })?)
            } else {
                Arc::new(connect(&config).await?)
            };

            self.agents
                .write()
                .await
                .entry(agent.clone())
                .or_default()
                .insert(config.name.clone(), connection);
        }
        info!(agent = %agent, "Agent MCP servers connected");
        Ok(())
    }

    /// Register a pre-built connection (embedders, tests).
    pub async fn insert_global_connection(&self, connection: McpConnection) {
        self.global
            .write()
            .await
            .insert(connection.name().to_string(), Arc::new(connection));
    }

    /// Register a pre-built per-agent connection (embedders, tests).
    pub async fn insert_agent_connection(&self, agent: &AgentId, connection: McpConnection) {
        self.agents
            .write()
            .await
            .entry(agent.clone())
            .or_default()
            .insert(connection.name().to_string(), Arc::new(connection));
    }

    /// Close an agent's own connections and drop its pool entry.
    ///
    /// Aliases to global connections are skipped: the global pool owns
    /// them and they outlive agent detach.
    pub async fn disconnect_agent(&self, agent: &AgentId) {
        let Some(pool) = self.agents.write().await.remove(agent) else {
            return;
        };
        let global = self.global.read().await;
        for (name, connection) in pool {
            let aliased = global
                .get(&name)
                .is_some_and(|g| Arc::ptr_eq(g, &connection));
            if aliased {
                debug!(agent = %agent, server = %name, "Skipping aliased global connection");
                continue;
            }
            connection.client.close().await;
        }
        info!(agent = %agent, "Agent disconnected");
    }

    /// Reconnect an agent with a new config list.
    ///
    /// # Errors
    ///
    /// Returns connection failures from the new config list.
    pub async fn reload_agent(
        &self,
        agent: &AgentId,
        configs: Vec<ServerConfig>,
    ) -> McpResult<()> {
        self.disconnect_agent(agent).await;
        self.connect_agent_servers(agent, configs).await
    }

    /// Discover the tools visible to `agent` across its connections.
    ///
    /// Cached per connection; cache misses call `tools/list` under a
    /// 5 s deadline and policy-filter the result before caching, so a
    /// denied tool never enters the cache.
    ///
    /// # Errors
    ///
    /// Returns transport or RPC failures from uncached servers.
    pub async fn discover_tools(&self, agent: &AgentId) -> McpResult<Vec<DiscoveredTool>> {
        let pool = {
            let agents = self.agents.read().await;
            agents.get(agent).cloned().unwrap_or_default()
        };

        let mut discovered = Vec::new();
        for (server, connection) in pool {
            if let Some(cached) = connection.tools_cache.read().await.as_ref() {
                discovered.extend(cached.iter().cloned());
                continue;
            }

            let listed = tokio::time::timeout(LIST_TOOLS_TIMEOUT, connection.client.list_tools())
                .await
                .map_err(|_| McpError::Timeout {
                    operation: "tools/list",
                })?;
            let listed = match listed {
                Ok(listed) => listed,
                Err(e) => {
                    connection.mark_unhealthy();
                    return Err(e);
                },
            };

            let accepted: Vec<DiscoveredTool> = listed
                .into_iter()
                .filter(|tool| {
                    self.policy
                        .allow_mcp_tool(agent.as_str(), &server, &tool.name)
                })
                .collect();

            debug!(
                agent = %agent,
                server = %server,
                accepted = accepted.len(),
                "MCP tools discovered"
            );
            *connection.tools_cache.write().await = Some(accepted.clone());
            discovered.extend(accepted);
        }
        Ok(discovered)
    }

    /// Invoke a tool on one of the agent's servers.
    ///
    /// The call is policy-checked even if discovery already filtered
    /// it; errors from the server propagate with
    /// `mcp tool <server>/<tool>:` context.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotFound`], [`McpError::PolicyDenied`],
    /// or the downstream call failure.
    pub async fn invoke_tool(
        &self,
        agent: &AgentId,
        server: &str,
        tool: &str,
        input: Value,
    ) -> McpResult<Value> {
        let connection = {
            let agents = self.agents.read().await;
            agents
                .get(agent)
                .and_then(|pool| pool.get(server))
                .cloned()
                .ok_or_else(|| McpError::ServerNotFound {
                    agent: agent.to_string(),
                    server: server.to_string(),
                })?
        };

        if !self.policy.allow_mcp_tool(agent.as_str(), server, tool) {
            return Err(McpError::PolicyDenied {
                agent: agent.to_string(),
                server: server.to_string(),
                tool: tool.to_string(),
            });
        }

        connection
            .client
            .call_tool(tool, input)
            .await
            .map_err(|source| McpError::ToolCall {
                server: server.to_string(),
                tool: tool.to_string(),
                source: Box::new(source),
            })
    }

    /// Structural readiness of an agent's connection to `server`.
    pub async fn healthy(&self, agent: &AgentId, server: &str) -> bool {
        let agents = self.agents.read().await;
        agents
            .get(agent)
            .and_then(|pool| pool.get(server))
            .is_some_and(|connection| connection.is_healthy())
    }

    /// Shut down everything: all agents, then the global pool.
    pub async fn stop(&self) {
        let agent_ids: Vec<AgentId> = self.agents.read().await.keys().cloned().collect();
        for agent in agent_ids {
            self.disconnect_agent(&agent).await;
        }
        let mut global = self.global.write().await;
        for (_, connection) in global.drain() {
            connection.client.close().await;
        }
        info!("MCP manager stopped");
    }
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager").finish_non_exhaustive()
    }
}

/// Spawn a reconnecting transport for `config` and run the handshake.
async fn connect(config: &ServerConfig) -> McpResult<McpConnection> {
    let transport = ReconnectingTransport::spawn(config.clone())?;
    let client = McpClient::new(config.name.clone(), Arc::new(transport));
    tokio::time::timeout(INITIALIZE_TIMEOUT, client.initialize())
        .await
        .map_err(|_| McpError::Timeout {
            operation: "initialize",
        })??;
    Ok(McpConnection::new(config.clone(), client))
}
