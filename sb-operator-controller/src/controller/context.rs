use kube::Client;
use std::sync::Arc;

use sb_operator_common::state::State;

use crate::store::{KubeObjectStore, ObjectStore};

// Context struct to hold the kube client, the object store and the state
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub store: Arc<dyn ObjectStore>,
    pub state: Arc<State>,
}

impl Context {
    pub fn new(client: Client, state: Arc<State>) -> Self {
        let store = KubeObjectStore::new(client.clone(), &state.config.controller.field_manager);

        Self {
            client,
            store: Arc::new(store),
            state,
        }
    }
}
