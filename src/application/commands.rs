use crate::application::scheduler::SchedulerContext;
use crate::domain::command::{FanMode, HoldType, Setpoint, SetpointChange, ThermostatCommand};
use crate::domain::device::{DeviceBinding, DeviceKind};
use crate::infrastructure::ecobee_client::EcobeeHttpClient;
use crate::infrastructure::error::InfraError;
use tracing::{info, warn};

/// Sends `command` for one thermostat and asks the scheduler for a prompt update.
pub async fn issue_thermostat_command<C>(
    context: &mut SchedulerContext<C>,
    account_id: &str,
    thermostat_id: &str,
    command: &ThermostatCommand,
) -> Result<(), InfraError>
where
    C: EcobeeHttpClient,
{
    let session = context
        .session_mut(account_id)
        .ok_or_else(|| InfraError::UnknownAccount(account_id.to_string()))?;
    let body = command.to_request_body(thermostat_id);
    let result = session.send_command(&body).await;

    match result {
        Ok(()) => {
            info!(account = %account_id, thermostat = %thermostat_id, action = %command, "command sent");
            context.update_trigger().request();
            Ok(())
        }
        Err(error) => {
            warn!(
                account = %account_id,
                thermostat = %thermostat_id,
                action = %command,
                error = %error,
                "command failed"
            );
            Err(error)
        }
    }
}

/// Resolves a bound thermostat device and applies its configured hold type to hold commands.
pub async fn issue_device_command<C>(
    context: &mut SchedulerContext<C>,
    device_id: &str,
    command: ThermostatCommand,
) -> Result<(), InfraError>
where
    C: EcobeeHttpClient,
{
    let binding = thermostat_binding(context, device_id)?;
    let hold_type = device_hold_type(&binding);
    let command = match command {
        ThermostatCommand::SetHold {
            cool, heat, fan_on, ..
        } => ThermostatCommand::SetHold {
            cool,
            heat,
            hold_type,
            fan_on,
        },
        ThermostatCommand::SetClimateHold { climate_ref, .. } => ThermostatCommand::SetClimateHold {
            climate_ref,
            hold_type,
        },
        other => other,
    };
    issue_thermostat_command(context, &binding.account_id, &binding.address, &command).await
}

/// Moves one setpoint of a bound thermostat, keeping the other at its last fetched value.
pub async fn change_device_setpoint<C>(
    context: &mut SchedulerContext<C>,
    device_id: &str,
    setpoint: Setpoint,
    change: SetpointChange,
) -> Result<(), InfraError>
where
    C: EcobeeHttpClient,
{
    let binding = thermostat_binding(context, device_id)?;
    let (cool, heat) = current_setpoints(context, &binding)?;
    let command =
        ThermostatCommand::setpoint_hold(cool, heat, setpoint, change, device_hold_type(&binding));
    issue_thermostat_command(context, &binding.account_id, &binding.address, &command).await
}

/// `On` holds the current setpoints with the fan running; `Auto` resumes the program.
pub async fn set_device_fan_mode<C>(
    context: &mut SchedulerContext<C>,
    device_id: &str,
    mode: FanMode,
) -> Result<(), InfraError>
where
    C: EcobeeHttpClient,
{
    let binding = thermostat_binding(context, device_id)?;
    let command = match mode {
        FanMode::On => {
            let (cool, heat) = current_setpoints(context, &binding)?;
            ThermostatCommand::SetHold {
                cool,
                heat,
                hold_type: device_hold_type(&binding),
                fan_on: true,
            }
        }
        FanMode::Auto => ThermostatCommand::ResumeProgram { resume_all: false },
    };
    issue_thermostat_command(context, &binding.account_id, &binding.address, &command).await
}

/// Resumes the scheduled program on every bound thermostat. One failure does not stop the rest.
pub async fn resume_all_programs<C>(
    context: &mut SchedulerContext<C>,
) -> Vec<(String, Result<(), InfraError>)>
where
    C: EcobeeHttpClient,
{
    let thermostats: Vec<DeviceBinding> = context
        .devices()
        .iter()
        .filter(|binding| binding.kind == DeviceKind::Thermostat)
        .cloned()
        .collect();

    let mut results = Vec::with_capacity(thermostats.len());
    for binding in thermostats {
        let result = issue_thermostat_command(
            context,
            &binding.account_id,
            &binding.address,
            &ThermostatCommand::ResumeProgram { resume_all: false },
        )
        .await;
        results.push((binding.device_id, result));
    }
    results
}

fn thermostat_binding<C>(
    context: &SchedulerContext<C>,
    device_id: &str,
) -> Result<DeviceBinding, InfraError>
where
    C: EcobeeHttpClient,
{
    let binding = context.device(device_id).ok_or_else(|| {
        InfraError::InvalidConfig(format!("device {device_id} is not bound to an account"))
    })?;
    if binding.kind != DeviceKind::Thermostat {
        return Err(InfraError::InvalidConfig(format!(
            "device {device_id} is not a thermostat"
        )));
    }
    Ok(binding.clone())
}

/// Desired cool and heat setpoints in °F from the account's last snapshot.
fn current_setpoints<C>(
    context: &SchedulerContext<C>,
    binding: &DeviceBinding,
) -> Result<(f64, f64), InfraError>
where
    C: EcobeeHttpClient,
{
    let session = context
        .session(&binding.account_id)
        .ok_or_else(|| InfraError::UnknownAccount(binding.account_id.clone()))?;
    let snapshot = session.snapshot();
    let record = snapshot.thermostat(&binding.address).ok_or_else(|| {
        InfraError::InvalidPayload(format!("no data fetched yet for thermostat {}", binding.address))
    })?;
    match (record.desired_cool, record.desired_heat) {
        (Some(cool), Some(heat)) => Ok((cool as f64 / 10.0, heat as f64 / 10.0)),
        _ => Err(InfraError::InvalidPayload(format!(
            "thermostat {} reported no current setpoints",
            binding.address
        ))),
    }
}

fn device_hold_type(binding: &DeviceBinding) -> HoldType {
    binding
        .hold_type
        .as_deref()
        .and_then(HoldType::parse)
        .unwrap_or_default()
}
