/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::utils::IllegalArgumentException;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Formatter};
use url::Url;

/// Server address, adapter set and credentials used to open a session, plus the
/// read-only values the server reports once a session exists.
///
/// Changes take effect on the next session creation.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectionDetails {
    server_address: Option<String>,
    adapter_set: Option<String>,
    user: Option<String>,
    #[serde(skip_serializing)]
    password: Option<String>,
    #[serde(skip)]
    pub(crate) session_id: Option<String>,
    #[serde(skip)]
    pub(crate) server_instance_address: Option<String>,
    #[serde(skip)]
    pub(crate) server_socket_name: Option<String>,
    #[serde(skip)]
    pub(crate) client_ip: Option<String>,
}

impl ConnectionDetails {
    /// Creates connection details for the given server, validating the address.
    pub fn new(
        server_address: Option<&str>,
        adapter_set: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<ConnectionDetails, IllegalArgumentException> {
        let mut details = ConnectionDetails::default();
        details.set_server_address(server_address.map(str::to_string))?;
        details.set_adapter_set(adapter_set.map(str::to_string));
        details.set_user(user.map(str::to_string));
        details.set_password(password.map(str::to_string));
        Ok(details)
    }

    /// Sets the server address. Only `http`, `https`, `ws` and `wss` URLs with a
    /// host are accepted; a trailing `/` is dropped.
    pub fn set_server_address(
        &mut self,
        server_address: Option<String>,
    ) -> Result<(), IllegalArgumentException> {
        let Some(address) = server_address else {
            self.server_address = None;
            return Ok(());
        };
        let url = Url::parse(&address)
            .map_err(|_| IllegalArgumentException::new("The given server address is not valid"))?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") || url.host().is_none() {
            return Err(IllegalArgumentException::new(
                "The given server address has an unsupported scheme or no host",
            ));
        }
        self.server_address = Some(address.trim_end_matches('/').to_string());
        Ok(())
    }

    pub fn get_server_address(&self) -> Option<&str> {
        self.server_address.as_deref()
    }

    pub fn set_adapter_set(&mut self, adapter_set: Option<String>) {
        self.adapter_set = adapter_set;
    }

    pub fn get_adapter_set(&self) -> Option<&str> {
        self.adapter_set.as_deref()
    }

    pub fn set_user(&mut self, user: Option<String>) {
        self.user = user;
    }

    pub fn get_user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    pub(crate) fn get_password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Session id of the current session, if any.
    pub fn get_session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Control link received with the session, or the configured address.
    pub fn get_server_instance_address(&self) -> Option<&str> {
        self.server_instance_address.as_deref()
    }

    pub fn get_server_socket_name(&self) -> Option<&str> {
        self.server_socket_name.as_deref()
    }

    pub fn get_client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    pub(crate) fn clear_session_fields(&mut self) {
        self.session_id = None;
        self.server_instance_address = None;
        self.server_socket_name = None;
        self.client_ip = None;
    }
}

impl Debug for ConnectionDetails {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("server_address", &self.server_address)
            .field("adapter_set", &self.adapter_set)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("session_id", &self.session_id)
            .field("server_instance_address", &self.server_instance_address)
            .finish()
    }
}
