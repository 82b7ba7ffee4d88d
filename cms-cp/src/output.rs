//! Console rendering of control point notifications.

use cms_control_point::{Notification, ParameterValue};

/// Text printed for one notification
pub fn render(notification: &Notification) -> String {
    match notification {
        Notification::DeviceAdded { udn, friendly_name } => {
            format!("Device added: {friendly_name} ({udn})")
        }
        Notification::DeviceRemoved { udn } => format!("Device removed: {udn}"),
        Notification::StateUpdate {
            udn,
            service,
            variable,
            value,
            parameters,
        } => {
            let mut out = format!("Event from {udn} [{service}]: {variable} = {value}");
            push_parameters(&mut out, parameters);
            out
        }
        Notification::VariableQueried {
            udn,
            variable,
            value,
            ..
        } => format!("GetVar on {udn}: {variable} = {value}"),
        Notification::ActionCompleted {
            control_url,
            action,
            parameters,
        } => {
            let mut out = format!("{action} completed ({control_url})");
            push_parameters(&mut out, parameters);
            out
        }
        Notification::ActionFailed {
            control_url,
            action,
            error,
        } => format!("{action} failed ({control_url}): {error}"),
    }
}

fn push_parameters(out: &mut String, parameters: &[ParameterValue]) {
    for parameter in parameters {
        out.push_str(&format!("\n    {} = {}", parameter.path, parameter.value));
    }
}
