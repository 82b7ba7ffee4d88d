//! Outbound action requests.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec;
use crate::device::ServiceState;
use crate::error::{ControlPointError, Result};
use crate::registry::DeviceRegistry;
use crate::transport::ActionRequest;

/// The ConfigurationManagement actions a control point issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Read the parameters under a path
    GetValues,
    /// Write one parameter
    SetValues,
    /// Toggle alarm eventing
    SetAlarmsEnabled,
}

impl ActionKind {
    /// SOAP action name
    pub fn action_name(&self) -> &'static str {
        match self {
            ActionKind::GetValues => "GetValues",
            ActionKind::SetValues => "SetValues",
            ActionKind::SetAlarmsEnabled => "SetAlarmsEnabled",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_name())
    }
}

/// An action addressed to a device by ordinal, not yet submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// 1-based device position
    pub ordinal: usize,
    /// Index into the device's service list
    pub service_index: usize,
    pub kind: ActionKind,
    pub path: String,
    pub value: String,
}

impl PendingAction {
    pub fn get_values(ordinal: usize, path: impl Into<String>) -> Self {
        Self {
            ordinal,
            service_index: 0,
            kind: ActionKind::GetValues,
            path: path.into(),
            value: String::new(),
        }
    }

    pub fn set_values(ordinal: usize, path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            ordinal,
            service_index: 0,
            kind: ActionKind::SetValues,
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn set_alarms_enabled(ordinal: usize, enabled: bool) -> Self {
        Self {
            ordinal,
            service_index: 0,
            kind: ActionKind::SetAlarmsEnabled,
            path: String::new(),
            value: if enabled { "1" } else { "0" }.to_string(),
        }
    }

    /// SOAP arguments for this action, values unescaped
    pub fn arguments(&self) -> Vec<(String, String)> {
        match self.kind {
            ActionKind::GetValues => vec![(
                "Parameters".to_string(),
                codec::encode_content_path_list(&self.path),
            )],
            ActionKind::SetValues => vec![(
                "ParameterValueList".to_string(),
                codec::encode_parameter_value_list(&self.path, &self.value),
            )],
            ActionKind::SetAlarmsEnabled => {
                vec![("StateVariableValue".to_string(), self.value.clone())]
            }
        }
    }
}

/// Builds action requests against registered devices and hands them to the
/// transport.
#[derive(Clone)]
pub struct ActionRequestBuilder {
    registry: Arc<DeviceRegistry>,
}

impl ActionRequestBuilder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Submit `action`; the result arrives later as an action-complete event.
    ///
    /// Returns the request as accepted by the transport.
    pub fn submit(&self, action: PendingAction) -> Result<ActionRequest> {
        if action.kind != ActionKind::SetAlarmsEnabled && action.path.is_empty() {
            return Err(ControlPointError::InvalidArgument(format!(
                "{} needs a parameter path",
                action.kind
            )));
        }

        let service = self.target(action.ordinal, action.service_index)?;
        let request = ActionRequest {
            control_url: service.control_url,
            service_type: service.service_type,
            action: action.kind.action_name().to_string(),
            arguments: action.arguments(),
        };

        debug!(
            ordinal = action.ordinal,
            action = %action.kind,
            control_url = %request.control_url,
            "Submitting action"
        );
        self.registry.transport().send_action(request.clone())?;
        Ok(request)
    }

    /// Ask the device for the current value of `variable`
    pub fn query_variable(&self, ordinal: usize, service_index: usize, variable: &str) -> Result<()> {
        if variable.trim().is_empty() {
            return Err(ControlPointError::InvalidArgument(
                "Variable name must not be empty".to_string(),
            ));
        }

        let service = self.target(ordinal, service_index)?;
        debug!(ordinal, variable, control_url = %service.control_url, "Querying state variable");
        self.registry
            .transport()
            .query_variable(&service.control_url, variable)?;
        Ok(())
    }

    /// Copy of the addressed service, checked for a usable control URL
    fn target(&self, ordinal: usize, service_index: usize) -> Result<ServiceState> {
        let device = self.registry.get(ordinal)?;
        let service = device
            .services
            .into_iter()
            .nth(service_index)
            .ok_or_else(|| {
                ControlPointError::ServiceNotFound(format!("service {service_index} on device {ordinal}"))
            })?;

        if service.control_url.is_empty() {
            return Err(ControlPointError::ServiceNotFound(format!(
                "{} on device {ordinal} has no control URL",
                service.service
            )));
        }

        if !service.is_subscribed() {
            if self.registry.config().require_subscription {
                return Err(ControlPointError::NotSubscribed {
                    ordinal,
                    service: service.service,
                });
            }
            warn!(ordinal, service = %service.service, "Sending action to a service without a subscription");
        }

        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ActionKind::GetValues, "GetValues")]
    #[case(ActionKind::SetValues, "SetValues")]
    #[case(ActionKind::SetAlarmsEnabled, "SetAlarmsEnabled")]
    fn test_action_names(#[case] kind: ActionKind, #[case] name: &str) {
        assert_eq!(kind.action_name(), name);
    }

    #[test]
    fn test_get_values_arguments() {
        let arguments = PendingAction::get_values(1, "/UPnP/DeviceInfo/").arguments();
        assert_eq!(arguments.len(), 1);
        assert_eq!(arguments[0].0, "Parameters");
        assert!(arguments[0].1.contains("<ContentPath>/UPnP/DeviceInfo/</ContentPath>"));
    }

    #[test]
    fn test_set_values_arguments() {
        let arguments = PendingAction::set_values(2, "/A/B", "on").arguments();
        assert_eq!(arguments[0].0, "ParameterValueList");
        assert!(arguments[0]
            .1
            .contains("<Parameter><ParameterPath>/A/B</ParameterPath><Value>on</Value></Parameter>"));
    }

    #[rstest]
    #[case(true, "1")]
    #[case(false, "0")]
    fn test_set_alarms_enabled_arguments(#[case] enabled: bool, #[case] expected: &str) {
        let action = PendingAction::set_alarms_enabled(1, enabled);
        assert_eq!(
            action.arguments(),
            vec![("StateVariableValue".to_string(), expected.to_string())]
        );
    }
}
