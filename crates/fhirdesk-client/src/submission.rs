//! 表单提交状态机
//!
//! 管理一次表单提交的生命周期：
//! Idle → ReadingAttachment（仅在选择了附件时）→ Submitting → Success / Failure

use fhirdesk_core::{DeskError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::dispatcher::SubmissionStatus;

/// 提交状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SubmissionState {
    Idle,
    ReadingAttachment,
    Submitting,
    Success,
    Failure,
}

impl SubmissionState {
    /// Success与Failure为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Success | SubmissionState::Failure)
    }
}

/// 提交事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SubmissionEvent {
    AttachmentChosen,
    AttachmentRead,
    Submit,
    Succeeded,
    Failed,
}

/// 状态转换表
#[derive(Debug)]
pub struct SubmissionStateMachine {
    transitions: HashMap<(SubmissionState, SubmissionEvent), SubmissionState>,
}

impl SubmissionStateMachine {
    pub fn new() -> Self {
        use SubmissionEvent as E;
        use SubmissionState as S;

        let mut transitions = HashMap::new();
        transitions.insert((S::Idle, E::AttachmentChosen), S::ReadingAttachment);
        transitions.insert((S::Idle, E::Submit), S::Submitting);
        transitions.insert((S::ReadingAttachment, E::AttachmentRead), S::Submitting);
        // 附件读取失败直接进入Failure
        transitions.insert((S::ReadingAttachment, E::Failed), S::Failure);
        transitions.insert((S::Submitting, E::Succeeded), S::Success);
        transitions.insert((S::Submitting, E::Failed), S::Failure);

        Self { transitions }
    }

    pub fn can_transition(&self, from: SubmissionState, event: SubmissionEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    pub fn transition(&self, from: SubmissionState, event: SubmissionEvent) -> Result<SubmissionState> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| DeskError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    pub fn possible_events(&self, current: SubmissionState) -> Vec<SubmissionEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for SubmissionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次提交；终态后不会自动重置，下一次提交需新建实例
#[derive(Debug)]
pub struct Submission {
    machine: SubmissionStateMachine,
    state: SubmissionState,
    history: Vec<SubmissionState>,
}

impl Submission {
    pub fn new() -> Self {
        Self {
            machine: SubmissionStateMachine::new(),
            state: SubmissionState::Idle,
            history: vec![SubmissionState::Idle],
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    /// 经历过的全部状态（含当前状态）
    pub fn history(&self) -> &[SubmissionState] {
        &self.history
    }

    pub fn fire(&mut self, event: SubmissionEvent) -> Result<SubmissionState> {
        let next = self.machine.transition(self.state, event)?;
        debug!("Submission {:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
        self.history.push(next);
        Ok(next)
    }

    /// 对外的二值状态，未到终态时为None
    pub fn status(&self) -> Option<SubmissionStatus> {
        match self.state {
            SubmissionState::Success => Some(SubmissionStatus::Success),
            SubmissionState::Failure => Some(SubmissionStatus::Failure),
            _ => None,
        }
    }
}

impl Default for Submission {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = SubmissionStateMachine::new();

        assert!(sm.can_transition(SubmissionState::Idle, SubmissionEvent::AttachmentChosen));
        assert!(sm.can_transition(SubmissionState::Idle, SubmissionEvent::Submit));
        assert!(sm.can_transition(SubmissionState::ReadingAttachment, SubmissionEvent::AttachmentRead));
        assert!(sm.can_transition(SubmissionState::Submitting, SubmissionEvent::Failed));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let sm = SubmissionStateMachine::new();

        for state in [SubmissionState::Success, SubmissionState::Failure] {
            assert!(state.is_terminal());
            assert!(sm.possible_events(state).is_empty());
        }
        assert!(!sm.can_transition(SubmissionState::Success, SubmissionEvent::Submit));
    }

    #[test]
    fn test_write_cannot_start_while_reading_attachment() {
        let mut submission = Submission::new();
        submission.fire(SubmissionEvent::AttachmentChosen).unwrap();

        let err = submission.fire(SubmissionEvent::Succeeded).unwrap_err();
        assert!(matches!(err, DeskError::InvalidStateTransition { .. }));
        assert_eq!(submission.state(), SubmissionState::ReadingAttachment);
        assert!(submission.status().is_none());
    }

    #[test]
    fn test_full_path_with_attachment() {
        let mut submission = Submission::new();
        submission.fire(SubmissionEvent::AttachmentChosen).unwrap();
        submission.fire(SubmissionEvent::AttachmentRead).unwrap();
        submission.fire(SubmissionEvent::Succeeded).unwrap();

        assert_eq!(
            submission.history(),
            &[
                SubmissionState::Idle,
                SubmissionState::ReadingAttachment,
                SubmissionState::Submitting,
                SubmissionState::Success,
            ]
        );
        assert_eq!(submission.status(), Some(SubmissionStatus::Success));
    }
}
