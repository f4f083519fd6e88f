use proptest::prelude::*;
use serde_json::{Map, Value};
use taskman_core::constants::failed_stage_name;
use taskman_core::models::merge_params;
use taskman_core::orchestration::StageData;
use taskman_core::state_machine::{TaskEvent, TaskState, TaskStateMachine};

fn state_strategy() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Pending),
        Just(TaskState::Running),
        Just(TaskState::Complete),
        Just(TaskState::Failed),
    ]
}

fn stage_name_strategy() -> impl Strategy<Value = String> {
    "On[A-Z][A-Za-z]{0,24}"
}

fn event_strategy() -> impl Strategy<Value = TaskEvent> {
    prop_oneof![
        Just(TaskEvent::Start),
        stage_name_strategy().prop_map(|stage| TaskEvent::stage(stage, None)),
        Just(TaskEvent::Complete(None)),
        "[a-z ]{1,32}".prop_map(TaskEvent::Fail),
    ]
}

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9-]{0,16}".prop_map(Value::String),
    ]
}

fn object_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z_]{1,8}", scalar_strategy(), 0..8)
        .prop_map(|entries| entries.into_iter().collect())
}

proptest! {
    /// Property: nothing leaves a terminal state
    #[test]
    fn terminal_states_accept_no_event(event in event_strategy()) {
        for state in [TaskState::Complete, TaskState::Failed] {
            prop_assert!(TaskStateMachine::determine_target_state(state, &event).is_err());
        }
    }

    /// Property: a transition ends terminal exactly when its event is terminal
    #[test]
    fn target_is_terminal_iff_event_is_terminal(
        state in state_strategy(),
        event in event_strategy(),
    ) {
        if let Ok(target) = TaskStateMachine::determine_target_state(state, &event) {
            prop_assert_ne!(target, TaskState::Pending);
            prop_assert_eq!(target.is_terminal(), event.is_terminal());
        }
    }

    /// Property: merged params hold every patch value and keep untouched keys
    #[test]
    fn merge_params_is_a_shallow_overwrite(
        base in object_strategy(),
        patch in object_strategy(),
    ) {
        let mut params = Value::Object(base.clone());
        merge_params(&mut params, Value::Object(patch.clone())).unwrap();

        let merged = params.as_object().unwrap();
        for (key, value) in &patch {
            prop_assert_eq!(merged.get(key), Some(value));
        }
        for (key, value) in &base {
            if !patch.contains_key(key) {
                prop_assert_eq!(merged.get(key), Some(value));
            }
        }
        prop_assert!(merged.keys().all(|k| base.contains_key(k) || patch.contains_key(k)));
    }

    /// Property: a null patch never changes params
    #[test]
    fn merge_params_ignores_null(base in object_strategy()) {
        let mut params = Value::Object(base.clone());
        merge_params(&mut params, Value::Null).unwrap();
        prop_assert_eq!(params, Value::Object(base));
    }

    /// Property: scalar patches are rejected and leave params intact
    #[test]
    fn merge_params_rejects_scalars(base in object_strategy(), patch in scalar_strategy()) {
        let mut params = Value::Object(base.clone());
        prop_assert!(merge_params(&mut params, patch).is_err());
        prop_assert_eq!(params, Value::Object(base));
    }

    /// Property: failure data always carries its reason
    #[test]
    fn failure_data_reports_its_reason(reason in "[a-zA-Z][a-zA-Z0-9 :]{0,40}") {
        let data = StageData::failure(reason.clone());
        prop_assert!(!data.succeeded);
        prop_assert_eq!(data.reason(), Some(reason));
    }

    /// Property: the failure continuation name extends the stage name
    #[test]
    fn failed_stage_name_extends_stage(stage in stage_name_strategy()) {
        let failed = failed_stage_name(&stage);
        prop_assert!(failed.starts_with(&stage));
        prop_assert!(failed.ends_with("Failed"));
        prop_assert_eq!(failed.len(), stage.len() + "Failed".len());
    }
}
