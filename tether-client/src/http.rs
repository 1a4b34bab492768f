//! Nacos Open API (v1) client over `ureq`.
//!
//! Every call walks the configured server list in order and moves on to the
//! next server only on transport failures; an HTTP error status from a
//! reachable server is returned as-is. With credentials configured the client
//! logs in at connect time and once more when a call is rejected with 403.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use tether_core::{ConfigKey, InstanceRegistration, NacosSettings, ServiceInstance, ServiceName};

use crate::client::{ChangeListener, ConfigClient, Connector, NamingClient, Subscription};
use crate::error::ClientError;
use crate::watch::{ConfigPoller, Fetch};

/// Path prefix of the Nacos HTTP API.
pub const CONTEXT_PATH: &str = "/nacos";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables for [`NacosHttpClient`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// How often watched configs are re-fetched.
    pub watch_interval: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            watch_interval: DEFAULT_WATCH_INTERVAL,
        }
    }
}

/// [`Connector`] producing [`NacosHttpClient`] handles.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    options: HttpOptions,
}

impl HttpConnector {
    pub fn new(options: HttpOptions) -> Self {
        Self { options }
    }
}

impl Connector for HttpConnector {
    fn connect_config(
        &self,
        settings: &NacosSettings,
    ) -> Result<Arc<dyn ConfigClient>, ClientError> {
        Ok(Arc::new(NacosHttpClient::connect(settings, &self.options)?))
    }

    fn connect_naming(
        &self,
        settings: &NacosSettings,
    ) -> Result<Arc<dyn NamingClient>, ClientError> {
        Ok(Arc::new(NacosHttpClient::connect(settings, &self.options)?))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

enum Reply {
    Body(String),
    NotFound,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginReply {
    access_token: String,
}

struct Transport {
    agent: ureq::Agent,
    servers: Vec<String>,
    namespace: Option<String>,
    credentials: Option<(String, String)>,
    token: Mutex<Option<String>>,
}

impl Transport {
    fn new(settings: &NacosSettings, options: &HttpOptions) -> Result<Self, ClientError> {
        let servers: Vec<String> = settings.servers().iter().map(|s| base_url(s)).collect();
        if servers.is_empty() {
            return Err(ClientError::NoServers);
        }
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(options.timeout).build(),
            servers,
            namespace: settings.namespace_id().map(str::to_owned),
            credentials: settings
                .credentials()
                .map(|(user, pass)| (user.to_owned(), pass.to_owned())),
            token: Mutex::new(None),
        })
    }

    fn login(&self) -> Result<(), ClientError> {
        let Some((user, pass)) = &self.credentials else {
            return Ok(());
        };
        let params = [("username", user.clone()), ("password", pass.clone())];
        let body = match self.call_once("POST", "/v1/auth/login", &params, None)? {
            Reply::Body(body) => body,
            Reply::NotFound => {
                return Err(ClientError::Malformed("login endpoint not found".into()));
            }
        };
        let reply: LoginReply = serde_json::from_str(&body)?;
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = Some(reply.access_token);
        tracing::debug!(user = %user, "nacos login succeeded");
        Ok(())
    }

    fn call(
        &self,
        method: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Reply, ClientError> {
        let token = self.token.lock().unwrap_or_else(|p| p.into_inner()).clone();
        match self.call_once(method, path, params, token.as_deref()) {
            Err(ClientError::Status { code: 403, .. }) if self.credentials.is_some() => {
                tracing::info!("nacos rejected access token, logging in again");
                self.login()?;
                let token = self.token.lock().unwrap_or_else(|p| p.into_inner()).clone();
                self.call_once(method, path, params, token.as_deref())
            }
            other => other,
        }
    }

    fn call_once(
        &self,
        method: &str,
        path: &str,
        params: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<Reply, ClientError> {
        let mut last_err = ClientError::NoServers;
        for server in &self.servers {
            let url = format!("{server}{path}");
            let mut request = self.agent.request(method, &url);
            for (name, value) in params {
                request = request.query(name, value);
            }
            if let Some(token) = token {
                request = request.query("accessToken", token);
            }

            match request.call() {
                Ok(response) => return Ok(Reply::Body(response.into_string()?)),
                Err(ureq::Error::Status(404, _)) => return Ok(Reply::NotFound),
                Err(ureq::Error::Status(code, response)) => {
                    return Err(ClientError::Status {
                        server: server.clone(),
                        code,
                        body: response.into_string().unwrap_or_default(),
                    });
                }
                Err(ureq::Error::Transport(transport)) => {
                    tracing::warn!(
                        server = %server,
                        error = %transport,
                        "nacos server unreachable, trying next",
                    );
                    last_err = ClientError::Transport {
                        server: server.clone(),
                        message: transport.to_string(),
                    };
                }
            }
        }
        Err(last_err)
    }

    fn with_namespace(&self, name: &'static str, params: &mut Vec<(&'static str, String)>) {
        if let Some(ns) = &self.namespace {
            params.push((name, ns.clone()));
        }
    }

    fn get_config(&self, key: &ConfigKey) -> Result<Option<String>, ClientError> {
        let mut params = vec![("dataId", key.data_id.0.clone()), ("group", key.group.clone())];
        self.with_namespace("tenant", &mut params);
        match self.call("GET", "/v1/cs/configs", &params)? {
            Reply::Body(body) => Ok(Some(body)),
            Reply::NotFound => Ok(None),
        }
    }
}

/// Normalize one `server_addresses` entry into an API base URL.
fn base_url(server: &str) -> String {
    let with_scheme = if server.starts_with("http://") || server.starts_with("https://") {
        server.to_owned()
    } else {
        format!("http://{server}")
    };
    let trimmed = with_scheme.trim_end_matches('/');
    if trimmed.ends_with(CONTEXT_PATH) {
        trimmed.to_owned()
    } else {
        format!("{trimmed}{CONTEXT_PATH}")
    }
}

/// Parse the body of `GET /v1/ns/instance/list`.
pub fn parse_instance_list(body: &str) -> Result<Vec<ServiceInstance>, ClientError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClientError::Malformed(format!("instance list is not JSON: {e}")))?;
    let hosts = value
        .get("hosts")
        .cloned()
        .ok_or_else(|| ClientError::Malformed("instance list has no 'hosts' field".into()))?;
    serde_json::from_value(hosts)
        .map_err(|e| ClientError::Malformed(format!("unexpected host entry: {e}")))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Blocking Nacos client. Config watches are served by a poll thread that
/// lives as long as the client.
pub struct NacosHttpClient {
    transport: Arc<Transport>,
    poller: ConfigPoller,
}

impl NacosHttpClient {
    /// Build a client, log in when credentials are configured, and probe the
    /// server so an unreachable registry fails here rather than on first use.
    pub fn connect(settings: &NacosSettings, options: &HttpOptions) -> Result<Self, ClientError> {
        let transport = Arc::new(Transport::new(settings, options)?);
        transport.login()?;
        // Older servers lack the readiness endpoint; any HTTP status proves reachability.
        match transport.call("GET", "/v1/console/health/readiness", &[]) {
            Ok(_) | Err(ClientError::Status { .. }) => {}
            Err(err) => return Err(err),
        }

        let fetcher = transport.clone();
        let fetch: Fetch = Arc::new(move |key: &ConfigKey| fetcher.get_config(key));
        tracing::info!(servers = %settings.server_addresses, "connected to nacos");
        Ok(Self {
            transport,
            poller: ConfigPoller::new(fetch, options.watch_interval),
        })
    }

    /// Number of config watches currently polled.
    pub fn active_watches(&self) -> usize {
        self.poller.active()
    }

    fn naming_params(
        &self,
        service: &ServiceName,
        ip: &str,
        port: u16,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("serviceName", service.0.clone()),
            ("ip", ip.to_owned()),
            ("port", port.to_string()),
        ];
        self.transport.with_namespace("namespaceId", &mut params);
        params
    }
}

impl ConfigClient for NacosHttpClient {
    fn get_config(&self, key: &ConfigKey) -> Result<Option<String>, ClientError> {
        self.transport.get_config(key)
    }

    fn subscribe(
        &self,
        key: &ConfigKey,
        listener: ChangeListener,
    ) -> Result<Subscription, ClientError> {
        Ok(self.poller.subscribe(key, listener))
    }
}

impl NamingClient for NacosHttpClient {
    fn register_instance(
        &self,
        service: &ServiceName,
        instance: &InstanceRegistration,
    ) -> Result<(), ClientError> {
        let mut params = self.naming_params(service, &instance.ip, instance.port);
        params.extend([
            ("weight", instance.weight.to_string()),
            ("enabled", "true".to_owned()),
            ("healthy", "true".to_owned()),
            ("ephemeral", instance.ephemeral.to_string()),
            ("clusterName", instance.cluster_name.clone()),
            ("metadata", serde_json::to_string(&instance.metadata)?),
        ]);
        self.transport.call("POST", "/v1/ns/instance", &params)?;
        Ok(())
    }

    fn send_heartbeat(
        &self,
        service: &ServiceName,
        instance: &InstanceRegistration,
    ) -> Result<(), ClientError> {
        let beat = json!({
            "serviceName": service.0,
            "ip": instance.ip,
            "port": instance.port,
            "weight": instance.weight,
            "cluster": instance.cluster_name,
            "metadata": instance.metadata,
            "scheduled": true,
        });
        let mut params = vec![
            ("serviceName", service.0.clone()),
            ("beat", beat.to_string()),
        ];
        self.transport.with_namespace("namespaceId", &mut params);
        match self.transport.call("PUT", "/v1/ns/instance/beat", &params)? {
            Reply::Body(_) => Ok(()),
            Reply::NotFound => Err(ClientError::Unavailable(format!(
                "instance {}:{} unknown to registry",
                instance.ip, instance.port
            ))),
        }
    }

    fn deregister_instance(
        &self,
        service: &ServiceName,
        ip: &str,
        port: u16,
    ) -> Result<(), ClientError> {
        let mut params = self.naming_params(service, ip, port);
        params.push(("ephemeral", "true".to_owned()));
        self.transport.call("DELETE", "/v1/ns/instance", &params)?;
        Ok(())
    }

    fn list_instances(&self, service: &ServiceName) -> Result<Vec<ServiceInstance>, ClientError> {
        let mut params = vec![
            ("serviceName", service.0.clone()),
            ("healthyOnly", "false".to_owned()),
        ];
        self.transport.with_namespace("namespaceId", &mut params);
        match self.transport.call("GET", "/v1/ns/instance/list", &params)? {
            Reply::Body(body) => parse_instance_list(&body),
            Reply::NotFound => Err(ClientError::Malformed(format!(
                "service '{service}' not found"
            ))),
        }
    }
}
