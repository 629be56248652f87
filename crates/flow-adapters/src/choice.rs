//! Implementaciones simples del servicio de choice.

use async_trait::async_trait;

use flow_core::errors::FlowError;
use flow_core::model::SwitchOption;
use flow_core::tool::{ChoiceOutcome, ChoiceService};

/// Devuelve siempre la opción configurada (tests y demos deterministas).
pub struct StaticChoice {
    pub option_id: String,
}

impl StaticChoice {
    pub fn new(option_id: impl Into<String>) -> Self {
        Self { option_id: option_id.into() }
    }
}

#[async_trait]
impl ChoiceService for StaticChoice {
    async fn choose(&self, _prompt: &str, _options: &[SwitchOption]) -> Result<ChoiceOutcome, FlowError> {
        Ok(ChoiceOutcome::Selected(self.option_id.clone()))
    }
}

/// Elige la primera opción declarada.
pub struct FirstOptionChoice;

#[async_trait]
impl ChoiceService for FirstOptionChoice {
    async fn choose(&self, _prompt: &str, options: &[SwitchOption]) -> Result<ChoiceOutcome, FlowError> {
        match options.first() {
            Some(o) => Ok(ChoiceOutcome::Selected(o.id.clone())),
            None => Err(FlowError::Execution { node_id: "choice".to_string(),
                                               node_kind: "switch".to_string(),
                                               message: "switch offered no options".to_string() }),
        }
    }
}
