//! Replay scheduler
//!
//! Marries controllers with an active replay configuration to concrete
//! replay channels and drives replay from the simulation step callback. All
//! messages whose timestamps fall inside a step are dispatched at the
//! beginning of that step; fine-grained intra-step ordering is not
//! preserved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, trace, warn};

use super::{
    ReplayChannel, ReplayChannelReader, ReplayDataController, ReplayFile, ReplayFileType,
    TraceMessageType,
};
use crate::config::{MdfChannelSelector, ReplayConfig, TraceSource, TraceSourceType};
use crate::error::{CoreError, CoreResult};
use crate::extension::{ExtensionError, ExtensionLoader};
use crate::participant::TimeProvider;
use crate::replay::pcap::PcapReplayFile;

/// Undecorated name of the extension providing MDF4 replay support
pub const MDF4_TRACING_EXTENSION: &str = "silkit-mdf4tracing";

struct ReplayTask {
    channel_name: String,
    reader: Box<dyn ReplayChannelReader>,
    controller: Arc<Mutex<dyn ReplayDataController>>,
    done_replaying: bool,
}

/// Drives configured controllers from recorded traffic, one step at a time
pub struct ReplayScheduler {
    time_provider: Arc<dyn TimeProvider>,
    participant_name: String,
    replay_files: HashMap<String, Arc<dyn ReplayFile>>,
    tasks: Vec<ReplayTask>,
    start_time: Option<Duration>,
    done: bool,
}

impl ReplayScheduler {
    /// Open all configured trace sources.
    ///
    /// Construction fails when a source cannot be opened or verified; the
    /// owning participant reports the error and refuses to start.
    pub fn new(
        participant_name: &str,
        trace_sources: &[TraceSource],
        extension_loader: &ExtensionLoader,
        time_provider: Arc<dyn TimeProvider>,
    ) -> CoreResult<Self> {
        let replay_files = create_replay_files(trace_sources, extension_loader)?;
        if replay_files.is_empty() {
            return Err(CoreError::Configuration(
                "ReplayScheduler: cannot open replay files, no trace sources configured"
                    .to_string(),
            ));
        }
        Ok(Self {
            time_provider,
            participant_name: participant_name.to_string(),
            replay_files,
            tasks: Vec::new(),
            start_time: None,
            done: false,
        })
    }

    /// Bind one controller to a replay channel of its configured source.
    ///
    /// A unique-match violation of an MDF channel selector is a
    /// configuration error; a missing channel only logs a warning and
    /// leaves the controller idle.
    pub fn configure_controller(
        &mut self,
        controller_name: &str,
        network_name: &str,
        network_type: TraceMessageType,
        replay_config: &ReplayConfig,
        controller: Arc<Mutex<dyn ReplayDataController>>,
    ) -> CoreResult<()> {
        // Not all controllers have active replaying; skipping is not an error
        if !replay_config.is_active() {
            debug!(
                "ReplayScheduler::configure_controller: skipping controller {} because it has \
                 no active replay",
                controller_name
            );
            return Ok(());
        }

        let replay_file = match self.replay_files.get(&replay_config.use_trace_source) {
            Some(file) => Arc::clone(file),
            None => {
                warn!(
                    "ReplayScheduler: could not configure controller {}: no replay file '{}'",
                    controller_name, replay_config.use_trace_source
                );
                return Ok(());
            }
        };

        let channel = match find_replay_channel(
            &replay_file,
            replay_config,
            controller_name,
            &self.participant_name,
            network_name,
            network_type,
        ) {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                warn!("{}: could not find a replay channel", controller_name);
                return Ok(());
            }
            Err(err) => {
                // Misconfiguration must not be swallowed
                warn!(
                    "ReplayScheduler: misconfiguration of controller {}: {}",
                    controller_name, err
                );
                return Err(err);
            }
        };

        self.tasks.push(ReplayTask {
            channel_name: channel.name().to_string(),
            reader: channel.reader(),
            controller,
            done_replaying: false,
        });
        Ok(())
    }

    /// Dispatch all messages due within `[now, now + duration)`.
    ///
    /// Invoked by the owning participant from its simulation step handler.
    /// The first real step captures the start time; steps taken before a
    /// synchronized time provider is attached are ignored.
    pub fn simulation_step(&mut self, now: Duration, duration: Duration) {
        if self.done {
            return;
        }
        if !self.time_provider.is_synchronizing_virtual_time() {
            // still attached to a wallclock time provider
            return;
        }

        if self.start_time.is_none() {
            self.start_time = Some(self.time_provider.now());
        }
        let start_time = self.start_time.unwrap_or_default();

        let relative_now = now.saturating_sub(start_time);
        let relative_end = relative_now + duration;

        for task in &mut self.tasks {
            if task.done_replaying {
                continue;
            }
            loop {
                let msg = match task.reader.read() {
                    Some(msg) => msg,
                    None => {
                        trace!(
                            "replay task on channel '{}' returned no message @{}ns",
                            task.channel_name,
                            now.as_nanos()
                        );
                        task.done_replaying = true;
                        break;
                    }
                };

                if msg.timestamp >= relative_end {
                    // message is after the current schedule
                    break;
                }

                // Messages are batched at the beginning of the step
                task.controller.lock().unwrap().replay_message(&msg);

                if !task.reader.seek(1) {
                    // end of the replay channel
                    task.done_replaying = true;
                    break;
                }
            }
        }
    }

    /// Stop dispatching; set by the owner on shutdown
    pub fn shutdown(&mut self) {
        self.done = true;
    }
}

/// Open every configured trace source into a replay file
fn create_replay_files(
    trace_sources: &[TraceSource],
    extension_loader: &ExtensionLoader,
) -> CoreResult<HashMap<String, Arc<dyn ReplayFile>>> {
    let mut replay_files: HashMap<String, Arc<dyn ReplayFile>> = HashMap::new();
    for source in trace_sources {
        match source.source_type {
            TraceSourceType::PcapFile => {
                let file = PcapReplayFile::open(&source.input_path)?;
                replay_files.insert(source.name.clone(), Arc::new(file));
            }
            TraceSourceType::Mdf4File => {
                // MDF4 support lives in an extension; resolve and verify it
                // first so search/version failures surface as usual. The
                // provider entry point itself has no finalized C signature
                // yet, so a verified library still cannot serve channels.
                let extension = extension_loader.load(MDF4_TRACING_EXTENSION)?;
                info!(
                    "Loaded MDF4 tracing extension '{}' by '{}'",
                    extension.extension_name(),
                    extension.vendor_name()
                );
                return Err(ExtensionError::ProviderInterfaceMissing {
                    name: MDF4_TRACING_EXTENSION.to_string(),
                }
                .into());
            }
        }
    }
    Ok(replay_files)
}

/// Mapping of selector fields to MDF meta-info keys, fixed by the MDF spec
fn match_mdf_channel(channel: &Arc<dyn ReplayChannel>, selector: &MdfChannelSelector) -> bool {
    let metas = channel.meta_infos();
    let field_matches = |selection: &Option<String>, key: &str| match selection {
        Some(wanted) => metas.get(key).map(|value| value == wanted).unwrap_or(false),
        None => true,
    };

    field_matches(&selector.channel_name, "mdf/channel_name")
        && field_matches(&selector.channel_source, "mdf/source_info_name")
        && field_matches(&selector.channel_path, "mdf/source_info_path")
        && field_matches(&selector.group_name, "mdf/channel_group_acquisition_name")
        && field_matches(&selector.group_source, "mdf/channel_group_name")
        && field_matches(&selector.group_path, "mdf/channel_group_path")
}

/// Identify a channel by the built-in `Link/Participant/Controller` naming
fn match_builtin_channel(
    channel: &Arc<dyn ReplayChannel>,
    network_name: &str,
    participant_name: &str,
    controller_name: &str,
) -> bool {
    let source_info = match channel.meta_infos().get("mdf/source_info_name") {
        Some(value) => value,
        None => return false,
    };
    let mut tokens = source_info.split('/');
    let (link, participant, service) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(link), Some(participant), Some(service)) => (link, participant, service),
        _ => return false,
    };
    link == network_name && participant == participant_name && service == controller_name
}

/// Find the channel a controller should replay from, or report a selector
/// mismatch
pub(crate) fn find_replay_channel(
    replay_file: &Arc<dyn ReplayFile>,
    replay_config: &ReplayConfig,
    controller_name: &str,
    participant_name: &str,
    network_name: &str,
    network_type: TraceMessageType,
) -> CoreResult<Option<Arc<dyn ReplayChannel>>> {
    let mut matches = Vec::new();

    for channel in replay_file.channels() {
        if replay_file.file_type() == ReplayFileType::Pcap
            && channel.message_type() == network_type
        {
            // PCAP only has a single replay channel
            info!(
                "Replay: using channel '{}' from '{}' on {}",
                channel.name(),
                replay_file.file_path().display(),
                controller_name
            );
            return Ok(Some(channel));
        }

        if replay_config.mdf_channel.has_selection() {
            // The user specifies lookup information for us
            if match_mdf_channel(&channel, &replay_config.mdf_channel) {
                matches.push(channel);
            }
        } else {
            // Built-in channel lookup by naming convention
            if channel.message_type() != network_type {
                trace!(
                    "Replay: skipping channel '{}' of type {}",
                    channel.name(),
                    channel.message_type()
                );
                continue;
            }
            if match_builtin_channel(&channel, network_name, participant_name, controller_name) {
                debug!(
                    "Replay: found channel '{}' from file '{}' for type {}",
                    channel.name(),
                    replay_file.file_path().display(),
                    channel.message_type()
                );
                matches.push(channel);
            }
        }
    }

    // When an MdfChannel config is given, the channel has to be unique
    if replay_config.mdf_channel.has_selection() && matches.len() != 1 {
        return Err(CoreError::Configuration(format!(
            "error in MDF channel selection: the config of {} found {} channels in \"{}\"; \
             MdfChannel config must yield a unique channel",
            replay_config.mdf_channel,
            matches.len(),
            replay_file.file_path().display()
        )));
    }

    Ok(matches.into_iter().next())
}
