use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::clone::{HostClient, UserResolver};

/// A `<script>` element as seen from the page context.
#[derive(Clone, Debug, Default)]
pub struct ScriptTag {
    pub element_id: Option<String>,
    pub src: Option<String>,
    pub body: Option<String>,
}

impl ScriptTag {
    pub fn external(src: impl Into<String>) -> Self {
        Self {
            element_id: None,
            src: Some(src.into()),
            body: None,
        }
    }

    pub fn inline(body: impl Into<String>) -> Self {
        Self {
            element_id: None,
            src: None,
            body: Some(body.into()),
        }
    }

    pub fn with_element_id(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }
}

/// A DOM element reduced to the attributes the detectors care about.
#[derive(Clone, Debug)]
pub struct ElementNode {
    pub tag: String,
    pub attributes: HashMap<String, String>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// The host application's documented runtime accessor for its serialized
/// state, when the page exposes one.
pub type StateAccessor = dyn Fn() -> Option<Value> + Send + Sync;

/// Snapshot of the page's runtime surface handed to the detectors.
///
/// Synthetic contexts drive the tests; the production bootstrap fills one
/// from the live page. Detectors only ever read from it.
pub struct PageContext {
    pub url: String,
    pub globals: Map<String, Value>,
    pub scripts: Vec<ScriptTag>,
    pub elements: Vec<ElementNode>,
    pub state_accessor: Option<Arc<StateAccessor>>,
    pub host_client: Option<Arc<dyn HostClient>>,
    pub user_resolver: Option<Arc<dyn UserResolver>>,
}

impl PageContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            globals: Map::new(),
            scripts: Vec::new(),
            elements: Vec::new(),
            state_accessor: None,
            host_client: None,
            user_resolver: None,
        }
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn with_script(mut self, script: ScriptTag) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn with_element(mut self, element: ElementNode) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_state_accessor(mut self, accessor: Arc<StateAccessor>) -> Self {
        self.state_accessor = Some(accessor);
        self
    }

    pub fn with_host_client(mut self, client: Arc<dyn HostClient>) -> Self {
        self.host_client = Some(client);
        self
    }

    pub fn with_user_resolver(mut self, resolver: Arc<dyn UserResolver>) -> Self {
        self.user_resolver = Some(resolver);
        self
    }
}

impl std::fmt::Debug for PageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageContext")
            .field("url", &self.url)
            .field("globals", &self.globals.len())
            .field("scripts", &self.scripts.len())
            .field("elements", &self.elements.len())
            .field("state_accessor", &self.state_accessor.is_some())
            .field("host_client", &self.host_client.is_some())
            .finish()
    }
}
