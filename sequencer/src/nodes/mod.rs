//! Built-in node catalog
//!
//! - [`buttons`]: operator gating
//! - [`decorators`]: progress, page switching and status rewriting
//! - [`control`]: sequencing composites
//! - [`remote`]: adapters driving the remote transport

pub mod buttons;
pub mod control;
pub mod decorators;
pub mod remote;

use crate::blackboard::ValueKind;
use crate::controls::keys;
use crate::error::ConfigurationError;
use crate::node::{Behavior, NodeKind};
use crate::registry::{NodeConfig, NodeRegistry};
use crate::transport::{RemoteTimeouts, SharedTransport, TimeoutClass};
use std::time::Duration;

use buttons::{ButtonApproval, ButtonMonitor};
use control::{Fallback, Parallel, Sequence, SequenceWithMemory};
use decorators::{ForceSuccess, Inverter, ProgressDecorator, SetPage};
use remote::{
    reference_key, CallSettings, PayloadTemplate, RemoteAction, RemotePublish, RemoteRequest, RemoteSpinner,
    RemoteTrigger,
};

/// Shape of a remote adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallShape {
    Trigger,
    Request,
    Action,
    Publish,
}

/// A named remote node: shape, default timeout class and default target
struct RemoteNode {
    type_name: &'static str,
    shape: CallShape,
    class: TimeoutClass,
    target: Option<&'static str>,
}

static REMOTE_NODES: &[RemoteNode] = &[
    // Generic adapters
    RemoteNode { type_name: "RemoteTrigger", shape: CallShape::Trigger, class: TimeoutClass::Short, target: None },
    RemoteNode { type_name: "RemoteRequest", shape: CallShape::Request, class: TimeoutClass::Short, target: None },
    RemoteNode { type_name: "RemoteAction", shape: CallShape::Action, class: TimeoutClass::Long, target: None },
    RemoteNode { type_name: "RemotePublish", shape: CallShape::Publish, class: TimeoutClass::Short, target: None },
    // Publishers
    RemoteNode { type_name: "ToolPathsPub", shape: CallShape::Publish, class: TimeoutClass::Short, target: Some("tool_paths") },
    RemoteNode { type_name: "MotionPlanPub", shape: CallShape::Publish, class: TimeoutClass::Short, target: Some("motion_plan") },
    // Short-running services
    RemoteNode { type_name: "TriggerService", shape: CallShape::Trigger, class: TimeoutClass::Short, target: None },
    RemoteNode {
        type_name: "GenerateToolPathsService",
        shape: CallShape::Request,
        class: TimeoutClass::Short,
        target: Some("generate_tool_paths"),
    },
    RemoteNode {
        type_name: "StartReconstructionService",
        shape: CallShape::Request,
        class: TimeoutClass::Short,
        target: Some("start_reconstruction"),
    },
    RemoteNode {
        type_name: "StopReconstructionService",
        shape: CallShape::Request,
        class: TimeoutClass::Short,
        target: Some("stop_reconstruction"),
    },
    // Long-running services and actions
    RemoteNode {
        type_name: "ExecuteMotionPlanService",
        shape: CallShape::Request,
        class: TimeoutClass::Long,
        target: Some("execute_motion_plan"),
    },
    RemoteNode {
        type_name: "GenerateMotionPlanService",
        shape: CallShape::Request,
        class: TimeoutClass::Long,
        target: Some("generate_motion_plan"),
    },
    RemoteNode {
        type_name: "GenerateScanMotionPlanService",
        shape: CallShape::Request,
        class: TimeoutClass::Long,
        target: Some("generate_scan_motion_plan"),
    },
    RemoteNode {
        type_name: "FollowJointTrajectoryAction",
        shape: CallShape::Action,
        class: TimeoutClass::Long,
        target: Some("follow_joint_trajectory"),
    },
];

/// Default progress indicator value reached when a `Progress` child succeeds
const DEFAULT_PROGRESS_TARGET: f64 = 100.0;

/// Register every built-in node type
pub(crate) fn register_catalog(registry: &mut NodeRegistry, transport: SharedTransport, timeouts: RemoteTimeouts) {
    register_gating(registry);
    register_decorators(registry);
    register_control(registry);

    for node in REMOTE_NODES {
        register_remote(registry, node, transport.clone(), timeouts);
    }

    for type_name in ["RemoteSpinner", "RosSpinner"] {
        let transport = transport.clone();
        registry.insert(type_name, NodeKind::Leaf, move |_| {
            Ok(Box::new(RemoteSpinner::new(transport.clone())))
        });
    }
}

fn register_gating(registry: &mut NodeRegistry) {
    registry.insert("ButtonMonitor", NodeKind::Leaf, |config| {
        let key = config.require_control("button", ValueKind::Button, None)?;
        Ok(Box::new(ButtonMonitor::new(key)))
    });

    registry.insert("ButtonApproval", NodeKind::Leaf, |config| {
        let approve = config.require_control("approve_button", ValueKind::Button, None)?;
        let reject_attribute = if config.attribute("disapprove_button").is_some() {
            "disapprove_button"
        } else {
            "reject_button"
        };
        let reject = config.require_control(reject_attribute, ValueKind::Button, None)?;
        Ok(Box::new(ButtonApproval::new(approve, reject)))
    });
}

fn register_decorators(registry: &mut NodeRegistry) {
    for type_name in ["Progress", "ProgressDecorator"] {
        registry.insert(type_name, NodeKind::Decorator, |config| {
            let key = config.require_control("progress_bar", ValueKind::Progress, Some(keys::PROGRESS_BAR))?;
            let target = config.parse::<f64>("progress")?.unwrap_or(DEFAULT_PROGRESS_TARGET);
            if !(0.0..=100.0).contains(&target) {
                return Err(invalid(config, "progress", format!("{} is outside 0-100", target)));
            }
            Ok(Box::new(ProgressDecorator::new(config.name, key, target)))
        });
    }

    for type_name in ["SetPage", "SetPageDecorator"] {
        registry.insert(type_name, NodeKind::Decorator, |config| {
            let key = config.require_control("stacked_widget", ValueKind::Page, Some(keys::STACKED_WIDGET))?;
            let index = config
                .parse::<usize>("index")?
                .ok_or_else(|| missing(config, "index"))?;
            Ok(Box::new(SetPage::new(config.name, key, index)))
        });
    }

    registry.insert("Inverter", NodeKind::Decorator, |config| Ok(Box::new(Inverter::new(config.name))));
    registry.insert("ForceSuccess", NodeKind::Decorator, |config| {
        Ok(Box::new(ForceSuccess::new(config.name)))
    });
}

fn register_control(registry: &mut NodeRegistry) {
    for type_name in ["SequenceWithMemory", "SNPSequenceWithMemory"] {
        registry.insert(type_name, NodeKind::Composite, |_| Ok(Box::new(SequenceWithMemory::new())));
    }
    registry.insert("Sequence", NodeKind::Composite, |_| Ok(Box::new(Sequence)));
    registry.insert("Fallback", NodeKind::Composite, |_| Ok(Box::new(Fallback::default())));
    registry.insert("Parallel", NodeKind::Composite, |config| {
        let success = config.parse::<usize>("success_count")?.unwrap_or(config.child_count);
        let failure = config.parse::<usize>("failure_count")?.unwrap_or(1);
        if success == 0 || success > config.child_count {
            return Err(invalid(
                config,
                "success_count",
                format!("must be between 1 and {}", config.child_count),
            ));
        }
        if failure == 0 {
            return Err(invalid(config, "failure_count", "must be at least 1".to_string()));
        }
        Ok(Box::new(Parallel::new(success, failure)))
    });
}

fn register_remote(registry: &mut NodeRegistry, node: &'static RemoteNode, transport: SharedTransport, timeouts: RemoteTimeouts) {
    registry.insert(node.type_name, NodeKind::Leaf, move |config| {
        build_remote(config, node, transport.clone(), timeouts)
    });
}

fn build_remote(
    config: &NodeConfig<'_>,
    node: &RemoteNode,
    transport: SharedTransport,
    timeouts: RemoteTimeouts,
) -> Result<Box<dyn Behavior>, ConfigurationError> {
    let timeout = timeout_for(config, node.class, timeouts)?;
    let target_attribute = match node.shape {
        CallShape::Trigger | CallShape::Request => "service",
        CallShape::Action => "action",
        CallShape::Publish => "topic",
    };
    let target = match (config.attribute(target_attribute), node.target) {
        (Some(target), _) => target.to_string(),
        (None, Some(default)) => default.to_string(),
        (None, None) => config.required(target_attribute)?.to_string(),
    };

    Ok(match node.shape {
        CallShape::Trigger => Box::new(RemoteTrigger::new(config.name, target, timeout, transport)),
        CallShape::Request => {
            let output = format!("{}_response", target);
            Box::new(RemoteRequest::new(call_settings(config, target, timeout, output), transport))
        }
        CallShape::Action => {
            let output = format!("{}_result", target);
            Box::new(RemoteAction::new(call_settings(config, target, timeout, output), transport))
        }
        CallShape::Publish => {
            let raw = config.required("input")?;
            let input = reference_key(raw).unwrap_or(raw);
            Box::new(RemotePublish::new(config.name, target, input, timeout, transport))
        }
    })
}

fn call_settings(config: &NodeConfig<'_>, target: String, timeout: Duration, default_output: String) -> CallSettings {
    let output = match config.attribute("output") {
        Some(raw) => reference_key(raw).unwrap_or(raw).to_string(),
        None => default_output,
    };
    CallSettings {
        node: config.name.to_string(),
        target,
        timeout,
        output,
        payload: PayloadTemplate::from_attributes(config.attributes),
    }
}

/// `timeout` may name a class (`short`, `long`) or give seconds
fn timeout_for(
    config: &NodeConfig<'_>,
    default: TimeoutClass,
    timeouts: RemoteTimeouts,
) -> Result<Duration, ConfigurationError> {
    let Some(raw) = config.attribute("timeout") else {
        return Ok(timeouts.for_class(default));
    };
    if let Ok(class) = raw.parse::<TimeoutClass>() {
        return Ok(timeouts.for_class(class));
    }
    match raw.trim().parse::<f64>().map(Duration::try_from_secs_f64) {
        Ok(Ok(timeout)) => Ok(timeout),
        Ok(Err(e)) => Err(invalid(config, "timeout", format!("'{}' is not a usable duration: {}", raw, e))),
        Err(_) => Err(invalid(
            config,
            "timeout",
            format!("expected 'short', 'long' or seconds, got '{}'", raw),
        )),
    }
}

fn missing(config: &NodeConfig<'_>, attribute: &str) -> ConfigurationError {
    ConfigurationError::MissingAttribute {
        node: config.name.to_string(),
        attribute: attribute.to_string(),
    }
}

fn invalid(config: &NodeConfig<'_>, attribute: &str, reason: String) -> ConfigurationError {
    ConfigurationError::InvalidAttribute {
        node: config.name.to_string(),
        attribute: attribute.to_string(),
        reason,
    }
}
