//! The live route table
//!
//! Routes are inserted first-writer-wins and never replaced or removed. Each
//! entry carries a caller-defined binding `B` (the server stores the route's
//! rate limiters there) built once, at the moment of first insertion.

use crate::route::{PathTemplate, RouteDescriptor, RouteKey};
use parking_lot::RwLock;
use std::sync::Arc;

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

/// A route as stored in the registry
#[derive(Debug)]
pub struct Registered<B> {
    pub descriptor: RouteDescriptor,
    pub binding: B,
    template: PathTemplate,
}

impl<B> Registered<B> {
    pub fn template(&self) -> &PathTemplate {
        &self.template
    }
}

/// Result of [`RouteRegistry::lookup`]
#[derive(Debug)]
pub struct RouteMatch<B> {
    route: Arc<Registered<B>>,
    params: Vec<(String, String)>,
}

impl<B> Clone for RouteMatch<B> {
    fn clone(&self) -> Self {
        RouteMatch {
            route: Arc::clone(&self.route),
            params: self.params.clone(),
        }
    }
}

impl<B> RouteMatch<B> {
    pub fn descriptor(&self) -> &RouteDescriptor {
        &self.route.descriptor
    }

    pub fn binding(&self) -> &B {
        &self.route.binding
    }

    /// Value captured for a path parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All captured path parameters in template order
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

struct Table<B> {
    by_key: HashMap<RouteKey, Arc<Registered<B>>>,
    // Parameterized routes, scanned when the exact key misses
    templated: Vec<Arc<Registered<B>>>,
}

/// Concurrent map from `(method, mounted path)` to a route
///
/// Lookups take the read lock; merges take the write lock for the whole
/// check-and-insert, so readers never observe a partial merge.
pub struct RouteRegistry<B = ()> {
    table: RwLock<Table<B>>,
}

impl<B> RouteRegistry<B> {
    pub fn new() -> Self {
        RouteRegistry {
            table: RwLock::new(Table {
                by_key: HashMap::new(),
                templated: Vec::new(),
            }),
        }
    }

    /// Insert `descriptor` unless its key is already taken
    ///
    /// Returns whether an insertion happened. An existing route is never
    /// overwritten, whichever backend it came from.
    pub fn merge(&self, descriptor: RouteDescriptor, binding: B) -> bool {
        self.merge_with(descriptor, |_| Ok::<_, std::convert::Infallible>(binding))
            .unwrap_or(false)
    }

    /// Like [`merge`](Self::merge), but builds the binding only when the key is free
    ///
    /// A failed `build` leaves the registry untouched.
    pub fn merge_with<E, F>(&self, descriptor: RouteDescriptor, build: F) -> Result<bool, E>
    where
        F: FnOnce(&RouteDescriptor) -> Result<B, E>,
    {
        let key = descriptor.key();
        let mut table = self.table.write();
        if table.by_key.contains_key(&key) {
            return Ok(false);
        }

        let binding = build(&descriptor)?;
        let template = PathTemplate::parse(&key.path);
        let route = Arc::new(Registered {
            descriptor,
            binding,
            template,
        });
        if !route.template.is_static() {
            table.templated.push(Arc::clone(&route));
        }
        table.by_key.insert(key, route);
        Ok(true)
    }

    pub fn contains(&self, key: &RouteKey) -> bool {
        self.table.read().by_key.contains_key(key)
    }

    /// Find the route serving `method` and concrete `path`
    ///
    /// An exact key wins; otherwise the matching template with the most
    /// literal segments, ties going to the earliest registered. A trailing
    /// slash is ignored for static and template routes alike.
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch<B>> {
        let key = RouteKey::new(method, path);
        let table = self.table.read();

        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        let exact = table.by_key.get(&key).or_else(|| {
            (trimmed != path)
                .then(|| table.by_key.get(&RouteKey::new(method, trimmed)))
                .flatten()
        });
        if let Some(route) = exact.filter(|route| route.template.is_static()) {
            return Some(RouteMatch {
                route: Arc::clone(route),
                params: Vec::new(),
            });
        }

        let mut best: Option<(usize, &Arc<Registered<B>>, Vec<(String, String)>)> = None;
        for route in table
            .templated
            .iter()
            .filter(|route| route.descriptor.method == key.method)
        {
            let Some(params) = route.template.matches(path) else {
                continue;
            };
            let rank = route.template.literal_count();
            if best.as_ref().is_none_or(|(best_rank, _, _)| rank > *best_rank) {
                best = Some((rank, route, params));
            }
        }

        best.map(|(_, route, params)| RouteMatch {
            route: Arc::clone(route),
            params,
        })
    }

    /// Snapshot of every route, sorted by mounted path then method
    pub fn all(&self) -> Vec<RouteDescriptor> {
        let table = self.table.read();
        let mut entries: Vec<(RouteKey, RouteDescriptor)> = table
            .by_key
            .iter()
            .map(|(key, route)| (key.clone(), route.descriptor.clone()))
            .collect();
        drop(table);

        entries.sort_by(|(a, _), (b, _)| a.path.cmp(&b.path).then_with(|| a.method.cmp(&b.method)));
        entries.into_iter().map(|(_, descriptor)| descriptor).collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B> Default for RouteRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn invoices() -> RouteDescriptor {
        RouteDescriptor::new("billing", "GET", "/invoices/:id")
            .mount_prefix("billing")
            .endpoint("Invoices.Get")
            .params(["id"])
    }

    #[test]
    fn test_first_writer_wins() {
        let registry = RouteRegistry::new();
        assert!(registry.merge(invoices(), 1));

        let hijack = RouteDescriptor::new("imposter", "GET", "/billing/invoices/:id")
            .global(true)
            .endpoint("Evil.Get");
        assert!(!registry.merge(hijack, 2));
        assert!(!registry.merge(invoices(), 3));

        assert_eq!(registry.len(), 1);
        let found = registry.lookup("GET", "/billing/invoices/9").unwrap();
        assert_eq!(found.descriptor().backend_name, "billing");
        assert_eq!(*found.binding(), 1);
    }

    #[test]
    fn test_method_is_part_of_the_key() {
        let registry: RouteRegistry = RouteRegistry::new();
        assert!(registry.merge(RouteDescriptor::new("a", "GET", "/x").global(true), ()));
        assert!(registry.merge(RouteDescriptor::new("a", "POST", "/x").global(true), ()));
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup("get", "/x").is_some());
        assert!(registry.lookup("DELETE", "/x").is_none());
    }

    #[test]
    fn test_global_and_scoped_mounting() {
        let registry: RouteRegistry = RouteRegistry::new();
        registry.merge(
            RouteDescriptor::new("billing", "GET", "/health")
                .mount_prefix("billing")
                .global(true),
            (),
        );
        registry.merge(
            RouteDescriptor::new("billing", "GET", "/invoices").mount_prefix("billing"),
            (),
        );

        assert!(registry.contains(&RouteKey::new("GET", "/health")));
        assert!(registry.contains(&RouteKey::new("GET", "/billing/invoices")));
        assert!(registry.lookup("GET", "/invoices").is_none());
    }

    #[test]
    fn test_static_route_beats_template() {
        let registry: RouteRegistry = RouteRegistry::new();
        registry.merge(
            RouteDescriptor::new("users", "GET", "/users/:id").global(true).endpoint("Users.Get"),
            (),
        );
        registry.merge(
            RouteDescriptor::new("users", "GET", "/users/me").global(true).endpoint("Users.Me"),
            (),
        );

        let me = registry.lookup("GET", "/users/me").unwrap();
        assert_eq!(me.descriptor().endpoint_name, "Users.Me");
        assert!(me.params().is_empty());

        let other = registry.lookup("GET", "/users/42").unwrap();
        assert_eq!(other.descriptor().endpoint_name, "Users.Get");
        assert_eq!(other.param("id"), Some("42"));
    }

    #[test]
    fn test_trailing_slash_matches_static_and_template_routes() {
        let registry: RouteRegistry = RouteRegistry::new();
        registry.merge(RouteDescriptor::new("svc", "GET", "/limited").mount_prefix("svc"), ());
        registry.merge(
            RouteDescriptor::new("svc", "GET", "/users/:id").mount_prefix("svc").params(["id"]),
            (),
        );
        registry.merge(RouteDescriptor::new("svc", "GET", "/").global(true), ());

        assert!(registry.lookup("GET", "/svc/limited/").is_some());
        assert_eq!(registry.lookup("GET", "/svc/users/42/").unwrap().param("id"), Some("42"));
        assert!(registry.lookup("GET", "/").is_some());
        assert!(registry.lookup("GET", "/svc/limited/extra").is_none());
    }

    #[test]
    fn test_most_literal_template_wins() {
        let registry: RouteRegistry = RouteRegistry::new();
        registry.merge(
            RouteDescriptor::new("a", "GET", "/:kind/:id").global(true).endpoint("Any"),
            (),
        );
        registry.merge(
            RouteDescriptor::new("a", "GET", "/orders/:id").global(true).endpoint("Orders"),
            (),
        );

        let found = registry.lookup("GET", "/orders/5").unwrap();
        assert_eq!(found.descriptor().endpoint_name, "Orders");
        let fallback = registry.lookup("GET", "/carts/5").unwrap();
        assert_eq!(fallback.descriptor().endpoint_name, "Any");
        assert_eq!(fallback.param("kind"), Some("carts"));
    }

    #[test]
    fn test_failed_binding_leaves_registry_untouched() {
        let registry: RouteRegistry<u32> = RouteRegistry::new();
        let result: Result<bool, &str> = registry.merge_with(invoices(), |_| Err("bad rule"));
        assert_eq!(result, Err("bad rule"));
        assert!(registry.is_empty());

        assert_eq!(registry.merge_with(invoices(), |_| Ok::<_, ()>(7)), Ok(true));
        // The builder is not consulted for a taken key
        assert_eq!(
            registry.merge_with(invoices(), |_| -> Result<u32, ()> { panic!("built twice") }),
            Ok(false)
        );
    }

    #[test]
    fn test_snapshot_is_sorted_and_stable() {
        let registry: RouteRegistry = RouteRegistry::new();
        let routes = [
            RouteDescriptor::new("b", "POST", "/b").global(true),
            RouteDescriptor::new("a", "GET", "/b").global(true),
            RouteDescriptor::new("a", "GET", "/a").global(true),
        ];
        for route in routes.iter().cloned() {
            registry.merge(route, ());
        }
        let first = registry.all();
        let paths: Vec<_> = first
            .iter()
            .map(|r| format!("{} {}", r.method, r.mounted_path()))
            .collect();
        assert_eq!(paths, ["GET /a", "GET /b", "POST /b"]);

        for route in routes {
            registry.merge(route, ());
        }
        assert_eq!(registry.all(), first);
    }

    #[test]
    fn test_concurrent_merges_insert_once() {
        let registry: Arc<RouteRegistry<usize>> = Arc::new(RouteRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.merge(invoices(), i))
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 1);
    }
}
