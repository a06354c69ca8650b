//! Choosing the initializer for a job

use std::sync::Arc;
use tracing::debug;

use super::{DateColumnsInitializer, Initializer, MultiInitializer, NoopInitializer, StagingTableInitializer};
use crate::error::StateError;
use crate::state::{keys, Branch, State};
use crate::writer::CommandsFactory;

/// Builds the per-branch initializers a job needs
///
/// A branch gets a staging table initializer when it names a destination
/// type and a date column initializer when its converter list includes
/// the row converter. Staging is prepared first so dates are read from
/// the final table after it is known to exist.
pub fn initializer_for(
    state: &State,
    factory: Arc<dyn CommandsFactory>,
) -> Result<Box<dyn Initializer>, StateError> {
    let mut members: Vec<Box<dyn Initializer>> = Vec::new();

    for branch in Branch::all(state)? {
        if state.contains(&branch.key(keys::WRITER_DESTINATION_TYPE)) {
            members.push(Box::new(StagingTableInitializer::new(
                state.clone(),
                branch,
                factory.clone(),
            )));
        }

        let converters = state.get_list(&branch.key(keys::CONVERTER_CLASSES));
        if converters.iter().any(|c| c.eq_ignore_ascii_case(keys::CONVERTER_ROW)) {
            members.push(Box::new(DateColumnsInitializer::new(
                state.clone(),
                branch,
                factory.clone(),
            )));
        }
    }

    debug!(initializers = members.len(), "Resolved job initializers");
    Ok(match members.len() {
        0 => Box::new(NoopInitializer),
        1 => members.remove(0),
        _ => Box::new(MultiInitializer::new(members)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::writer::{MemoryCommandsFactory, MemoryDatabase};

    fn factory() -> Arc<dyn CommandsFactory> {
        Arc::new(MemoryCommandsFactory::new(MemoryDatabase::new(), 30))
    }

    #[test]
    fn test_nothing_configured_is_noop() {
        let initializer = initializer_for(&State::new(), factory()).unwrap();
        assert_eq!(initializer.name(), "noop");
    }

    #[test]
    fn test_single_member_is_returned_directly() {
        let state = State::new().with_prop(keys::CONVERTER_CLASSES, "field_pick, row");
        let initializer = initializer_for(&state, factory()).unwrap();
        assert_eq!(initializer.name(), "date_columns[0]");
    }

    #[test]
    fn test_branches_are_aggregated() {
        let state = State::new()
            .with_prop(keys::FORK_BRANCHES, 2)
            .with_prop("converter.classes.0", "row")
            .with_prop("converter.classes.1", "row")
            .with_prop("writer.destination.type.1", "mysql");
        let initializer = initializer_for(&state, factory()).unwrap();
        assert_eq!(initializer.name(), "multi");
    }
}
