//! Applying GENA property sets to service state.

use tracing::{debug, trace};
use xmltree::Element;

use crate::codec::{self, ParameterValue};
use crate::device::ServiceState;
use crate::xml::{elements_by_tag_name, raw_text, tree};

/// One variable written by [`apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub variable: &'static str,
    /// Raw value as stored
    pub value: String,
    /// Decoded pairs when the value is an aggregated document, else empty
    pub parameters: Vec<ParameterValue>,
}

/// Store every schema variable found in `propertyset` into `state`.
///
/// Each `property` element is searched for every variable of the service;
/// the first match in a property wins. Unknown variables are ignored. Values
/// are stored exactly as received; one that is not a well-formed aggregate
/// carries no parameters.
pub fn apply(state: &mut ServiceState, propertyset: &Element) -> Vec<StateChange> {
    let mut changes = Vec::new();

    for property in elements_by_tag_name(propertyset, "property") {
        for &variable in state.service.schema().variables {
            let Some(element) = tree::find_descendant(property, variable) else {
                continue;
            };
            let value = raw_text(element);
            state.set_variable(variable, value.clone());

            let parameters = match codec::decode_aggregated(value.trim()) {
                Ok(aggregated) => {
                    debug!(
                        variable,
                        version = aggregated.version,
                        count = aggregated.parameters.len(),
                        "Aggregated value decoded"
                    );
                    aggregated.parameters
                }
                Err(e) => {
                    trace!(variable, error = %e, "Value kept verbatim");
                    Vec::new()
                }
            };

            changes.push(StateChange {
                variable,
                value,
                parameters,
            });
        }
    }

    changes
}
