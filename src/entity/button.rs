use super::{DeskEntity, EntityBase, EntityState, Platform};
use crate::coordinator::{DeskCoordinator, DeskSnapshot};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonAction {
    Preset1,
    Preset2,
    Sit,
    Stand,
}

impl ButtonAction {
    pub fn all() -> [Self; 4] {
        [Self::Preset1, Self::Preset2, Self::Sit, Self::Stand]
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Preset1 => "desk_preset_1",
            Self::Preset2 => "desk_preset_2",
            Self::Sit => "desk_sit",
            Self::Stand => "desk_stand",
        }
    }
}

/// Moves the desk when pressed
#[derive(Clone)]
pub struct PresetButton {
    base: EntityBase,
    action: ButtonAction,
    available: bool,
}

impl PresetButton {
    pub fn new(coordinator: DeskCoordinator, action: ButtonAction) -> Self {
        log::debug!(
            "Initializing {} button for desk {}",
            action.key(),
            coordinator.desk_info()
        );
        Self {
            base: EntityBase::new(coordinator, action.key(), Platform::Button),
            action,
            available: false,
        }
    }

    pub fn all(coordinator: &DeskCoordinator) -> Vec<Self> {
        ButtonAction::all()
            .into_iter()
            .map(|action| Self::new(coordinator.clone(), action))
            .collect()
    }

    pub fn action(&self) -> ButtonAction {
        self.action
    }

    pub async fn press(&self) -> Result<()> {
        let coordinator = self.base.coordinator();
        match self.action {
            ButtonAction::Preset1 => coordinator.move_to_preset(1).await,
            ButtonAction::Preset2 => coordinator.move_to_preset(2).await,
            ButtonAction::Sit => coordinator.move_to_sit().await,
            ButtonAction::Stand => coordinator.move_to_stand().await,
        }
    }
}

impl DeskEntity for PresetButton {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn handle_coordinator_update(&mut self, snapshot: &DeskSnapshot) {
        self.available = snapshot.connected;
    }

    fn state(&self) -> EntityState {
        EntityState::Button
    }

    fn available(&self) -> bool {
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desk::{DeskCommand, Preset};
    use crate::error::DeskError;
    use crate::testing::{fast_settings, test_desk, FakeDesk, FakeFactory};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_press_sends_preset() {
        let fake = FakeDesk::new();
        let coordinator = DeskCoordinator::new(
            test_desk(),
            Arc::new(FakeFactory(fake.clone())),
            fast_settings(),
        );
        coordinator.connect().await.unwrap();

        for button in PresetButton::all(&coordinator) {
            button.press().await.unwrap();
        }

        let moves: Vec<DeskCommand> = fake
            .commands()
            .into_iter()
            .filter(|c| *c != DeskCommand::Wake)
            .collect();
        assert_eq!(
            moves,
            vec![
                DeskCommand::MoveToPreset(Preset::One),
                DeskCommand::MoveToPreset(Preset::Two),
                DeskCommand::MoveToPreset(Preset::SIT),
                DeskCommand::MoveToPreset(Preset::STAND),
            ]
        );
    }

    #[tokio::test]
    async fn test_press_while_disconnected_fails_fast() {
        let fake = FakeDesk::new();
        fake.hang.store(true, Ordering::SeqCst);
        let coordinator = DeskCoordinator::new(
            test_desk(),
            Arc::new(FakeFactory(fake)),
            fast_settings(),
        );
        let button = PresetButton::new(coordinator, ButtonAction::Stand);

        let result = tokio::time::timeout(Duration::from_secs(1), button.press())
            .await
            .expect("press should not hang");
        assert!(matches!(result, Err(DeskError::NotConnected)));
    }
}
