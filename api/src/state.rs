// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::sync::Arc;
use update::{UpdateEnv, UpdateManager};

use crate::auth::Credentials;

/// What every handler gets
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<UpdateManager>,
    pub credentials: Arc<Credentials>,
}

impl ApiState {
    #[must_use]
    pub fn new(manager: Arc<UpdateManager>, credentials: Credentials) -> Self {
        Self {
            manager,
            credentials: Arc::new(credentials),
        }
    }

    #[must_use]
    pub fn env(&self) -> &Arc<UpdateEnv> {
        self.manager.env()
    }
}
