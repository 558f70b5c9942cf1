//! Response middlewares (`spec.md` §4.4 step 6 / §4.7): plugged into the `Gateway` facade, run in
//! order over the fully stitched result tree before it reaches the client. `scrubInsertionIDs`
//! is the one built-in and is always first.

use serde_json::Value;

use crate::plan::{Path, PathPoint};

/// Mutates the stitched response tree. `scrub_paths` are the abstract insertion points of every
/// synthetic `id` the planner injected for stitching, so a middleware can find and remove them.
pub trait ResponseMiddleware: Send + Sync {
    fn apply(&self, response: &mut Value, scrub_paths: &[Path]);
}

/// Deletes the synthetic `id` field at every concrete location addressed by each abstract scrub
/// path, fanning out over list fields exactly like the executor's insertion-point expansion
/// (`spec.md` §4.4 step 6 / §7's "scrub" Testable Property). A client that explicitly asked for
/// `id` is unaffected: the scrub list only ever contains ids the planner itself inserted.
pub struct ScrubInsertionIds;

impl ResponseMiddleware for ScrubInsertionIds {
    fn apply(&self, response: &mut Value, scrub_paths: &[Path]) {
        for path in scrub_paths {
            scrub_at(response, &path.0);
        }
    }
}

fn scrub_at(value: &mut Value, points: &[PathPoint]) {
    let Some((head, rest)) = points.split_first() else {
        if let Value::Object(map) = value {
            map.remove("id");
        }
        return;
    };

    let field = head.field_name();
    let Value::Object(map) = value else { return };
    let Some(next) = map.get_mut(field) else {
        return;
    };

    match next {
        Value::Array(items) => {
            for item in items {
                scrub_at(item, rest);
            }
        }
        Value::Null => {}
        _ => scrub_at(next, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_synthetic_id_from_nested_list() {
        let mut response = serde_json::json!({
            "allUsers": [
                {"id": "1", "firstName": "Ada", "lastName": "Lovelace"},
                {"id": "2", "firstName": "Grace", "lastName": "Hopper"}
            ]
        });
        let scrub_paths = vec![Path::root().push_field("allUsers")];
        ScrubInsertionIds.apply(&mut response, &scrub_paths);
        assert_eq!(
            response,
            serde_json::json!({
                "allUsers": [
                    {"firstName": "Ada", "lastName": "Lovelace"},
                    {"firstName": "Grace", "lastName": "Hopper"}
                ]
            })
        );
    }

    #[test]
    fn scrub_tolerates_missing_targets() {
        let mut response = serde_json::json!({"user": null});
        let scrub_paths = vec![Path::root().push_field("user")];
        ScrubInsertionIds.apply(&mut response, &scrub_paths);
        assert_eq!(response, serde_json::json!({"user": null}));
    }
}
