//! DICOM SCP state machine (C6, `spec.md` §4.6).
//!
//! Grounded on the teacher's `main.rs`/`server.rs`/`scp.rs`/`threads.rs`: a
//! `std::net::TcpListener` accept loop (`server.rs`) feeding a bounded
//! `ThreadPool` (`threads.rs`), and `dicom_ul::association::server`
//! negotiation exactly as the teacher's original `scp.rs` built it (a single
//! PDU-dispatch loop keyed on the DIMSE command field). This generalizes
//! that loop to also dispatch C-FIND/C-MOVE, grounded additionally on the
//! teacher's own `findscu.rs` client-side DIMSE framing mirrored server-side.

use std::net::TcpStream;
use std::time::Instant;

use dicom_core::header::Header;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemDicomObject;
use dicom_object::FileMetaTableBuilder;
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use dicom_encoding::TransferSyntaxIndex;
use dicom_ul::pdu::PDataValueType;
use dicom_ul::Pdu;

use crate::dicomrs_options::ServerNegotiation;
use crate::environment::ServerEnvironment;
use crate::error::CoreError;
use crate::finder::{FinderQuery, Matcher, TagConstraint};
use crate::model::{IngestStatus, ResourceLevel};

/// Command field values this dispatcher understands (`spec.md` §4.6 "Dispatch").
mod command_field {
    pub const C_STORE_RQ: u16 = 0x0001;
    pub const C_GET_RQ: u16 = 0x0010;
    pub const C_FIND_RQ: u16 = 0x0020;
    pub const C_MOVE_RQ: u16 = 0x0021;
    pub const C_ECHO_RQ: u16 = 0x0030;
    pub const C_CANCEL_RQ: u16 = 0x0FFF;
    pub const C_STORE_RSP: u16 = 0x8001;
    pub const C_FIND_RSP: u16 = 0x8020;
    pub const C_MOVE_RSP: u16 = 0x8021;
    pub const C_ECHO_RSP: u16 = 0x8030;
}

/// DIMSE status codes this dispatcher emits (PS 3.7 Annex C).
mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const PENDING: u16 = 0xFF00;
    pub const CANCEL: u16 = 0xFE00;
    pub const UNABLE_TO_PROCESS: u16 = 0x0110;
}

/// Negotiate one association and run the DIMSE dispatch loop until release,
/// abort, or an association-level timeout (`spec.md` §4.6 "Lifecycle").
pub fn handle_association(stream: TcpStream, env: &ServerEnvironment) -> Result<(), CoreError> {
    let peer_addr = stream.peer_addr().ok();
    let settings = &env.settings;

    let negotiation = ServerNegotiation {
        aet: crate::dicomrs_options::OurAETitle::new(settings.dicom_aet.clone()),
        strict: settings.strict_aet_comparison,
        uncompressed_only: false,
        promiscuous: !settings.dicom_check_called_aet,
        max_pdu_length: settings.max_pdu_length as u32,
    };
    let options: dicom_ul::association::ServerAssociationOptions<'_, _> = negotiation.into();

    let mut association = options
        .establish(stream)
        .map_err(|e| CoreError::NetworkProtocol(format!("could not establish association: {e}")))?;

    let calling_aet = association.client_ae_title().to_string();
    tracing::info!(calling_aet = %calling_aet, peer = ?peer_addr, "accepted association");

    if settings.dicom_check_modality_host {
        let allowed = env
            .modalities()
            .values()
            .any(|m| m.aet == calling_aet && host_matches(&m.host, peer_addr));
        if !allowed {
            tracing::warn!(calling_aet = %calling_aet, peer = ?peer_addr, "rejecting association: calling AET/host not in the modality table");
            let _ = association.abort();
            return Err(CoreError::NetworkProtocol(format!(
                "CallingAETitleNotRecognized: {calling_aet} from {peer_addr:?} is not an allowed modality"
            )));
        }
    }

    let dimse_timeout = settings.dicom_scp_timeout;
    let mut last_activity = Instant::now();
    let mut instance_buffer: Vec<u8> = Vec::with_capacity(1024 * 1024);
    let mut identifier_buffer: Vec<u8> = Vec::new();
    let mut pending_command: Option<InMemDicomObject> = None;

    loop {
        let pdu = match bubble_no_pdu(association.receive()) {
            Ok(Some(pdu)) => pdu,
            Ok(None) => {
                if last_activity.elapsed() > dimse_timeout {
                    tracing::warn!(calling_aet = %calling_aet, "DIMSE timeout, aborting association");
                    let _ = association.abort();
                    return Err(CoreError::NetworkProtocol("DIMSE timeout".to_string()));
                }
                continue;
            }
            Err(e) => return Err(CoreError::NetworkProtocol(format!("error receiving PDU: {e}"))),
        };
        last_activity = Instant::now();

        match pdu {
            Pdu::PData { ref data } => {
                if data.is_empty() {
                    continue;
                }
                let value = &data[0];
                if value.value_type == PDataValueType::Command {
                    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
                    let obj = InMemDicomObject::read_dataset_with_ts(value.data.as_slice(), &ts)
                        .map_err(|e| CoreError::BadFileFormat(format!("could not read DIMSE command: {e}")))?;
                    if value.is_last {
                        let command_field = read_u16(&obj, tags::COMMAND_FIELD)?;
                        let has_dataset = obj
                            .element(tags::COMMAND_DATA_SET_TYPE)
                            .ok()
                            .and_then(|e| e.to_int::<u16>().ok())
                            .map(|v| v != 0x0101)
                            .unwrap_or(false);

                        if !has_dataset {
                            dispatch_command_only(
                                &mut association,
                                command_field,
                                &obj,
                                value.presentation_context_id,
                                &calling_aet,
                            )?;
                        } else {
                            pending_command = Some(obj);
                            instance_buffer.clear();
                            identifier_buffer.clear();
                        }
                    }
                } else if value.value_type == PDataValueType::Data {
                    let pc_id = value.presentation_context_id;
                    if value.is_last {
                        let mut buf = match &pending_command {
                            Some(_) => std::mem::take(&mut identifier_buffer),
                            None => std::mem::take(&mut instance_buffer),
                        };
                        buf.extend_from_slice(&value.data);

                        if let Some(command) = pending_command.take() {
                            let command_field = read_u16(&command, tags::COMMAND_FIELD)?;
                            dispatch_with_dataset(
                                &mut association,
                                env,
                                command_field,
                                &command,
                                &buf,
                                pc_id,
                                &calling_aet,
                            )?;
                        } else {
                            instance_buffer = buf;
                        }
                    } else if pending_command.is_some() {
                        identifier_buffer.extend_from_slice(&value.data);
                    } else {
                        instance_buffer.extend_from_slice(&value.data);
                    }
                }
            }
            Pdu::ReleaseRQ => {
                let _ = association.send(&Pdu::ReleaseRP);
                tracing::info!(calling_aet = %calling_aet, "association released");
                return Ok(());
            }
            Pdu::AbortRQ { .. } => {
                tracing::info!(calling_aet = %calling_aet, "association aborted by peer");
                return Ok(());
            }
            _ => {}
        }
    }
}

fn host_matches(configured_host: &str, peer_addr: Option<std::net::SocketAddr>) -> bool {
    match peer_addr {
        Some(addr) => addr.ip().to_string() == configured_host,
        None => false,
    }
}

fn bubble_no_pdu(
    pdu: Result<Pdu, dicom_ul::association::server::Error>,
) -> Result<Option<Pdu>, dicom_ul::association::server::Error> {
    pdu.map(Some).or_else(|e| {
        if let dicom_ul::association::server::Error::Receive { source } = &e {
            if matches!(source, dicom_ul::pdu::reader::Error::NoPduAvailable { .. }) {
                return Ok(None);
            }
        }
        Err(e)
    })
}

fn read_u16(obj: &InMemDicomObject, tag: Tag) -> Result<u16, CoreError> {
    obj.element(tag)
        .map_err(|_| CoreError::missing_tag(tag))?
        .to_int::<u16>()
        .map_err(|_| CoreError::BadFileFormat(format!("{tag} is not a number")))
}

fn read_str(obj: &InMemDicomObject, tag: Tag) -> Result<String, CoreError> {
    obj.element(tag)
        .map_err(|_| CoreError::missing_tag(tag))?
        .to_str()
        .map(|s| s.into_owned())
        .map_err(|_| CoreError::BadFileFormat(format!("could not read {tag}")))
}

type Association = dicom_ul::association::server::ServerAssociation<TcpStream>;

/// Command PDUs carrying no data set (`spec.md` §4.6 "Dispatch": C-ECHO-RQ).
fn dispatch_command_only(
    association: &mut Association,
    command_field: u16,
    command: &InMemDicomObject,
    presentation_context_id: u8,
    calling_aet: &str,
) -> Result<(), CoreError> {
    let message_id = read_u16(command, tags::MESSAGE_ID)?;
    match command_field {
        command_field::C_ECHO_RQ => {
            tracing::info!(calling_aet, "C-ECHO");
            send_simple_response(
                association,
                presentation_context_id,
                command_field::C_ECHO_RSP,
                message_id,
                status::SUCCESS,
                None,
            )
        }
        command_field::C_CANCEL_RQ => Ok(()),
        command_field::C_GET_RQ => {
            // C-GET is not offered as an accepted abstract syntax (`spec.md` §4.6
            // "it does not originate C-GETs"); a peer sending one anyway gets refused.
            send_simple_response(association, presentation_context_id, 0x8010, message_id, status::UNABLE_TO_PROCESS, None)
        }
        other => Err(CoreError::NotImplemented(format!("unsupported command field {other:#06x} without data set"))),
    }
}

/// Command PDUs followed by a data set (`spec.md` §4.6 "Dispatch":
/// C-STORE-RQ, C-FIND-RQ, C-MOVE-RQ).
fn dispatch_with_dataset(
    association: &mut Association,
    env: &ServerEnvironment,
    command_field: u16,
    command: &InMemDicomObject,
    dataset_bytes: &[u8],
    presentation_context_id: u8,
    calling_aet: &str,
) -> Result<(), CoreError> {
    let message_id = read_u16(command, tags::MESSAGE_ID)?;
    let ts_uid = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.id == presentation_context_id)
        .map(|pc| pc.transfer_syntax.clone())
        .ok_or_else(|| CoreError::NetworkProtocol("no presentation context for incoming data set".to_string()))?;
    let ts = TransferSyntaxRegistry
        .get(&ts_uid)
        .ok_or_else(|| CoreError::NotImplemented(format!("unsupported transfer syntax {ts_uid}")))?;

    match command_field {
        command_field::C_STORE_RQ => {
            let sop_class_uid = read_str(command, tags::AFFECTED_SOP_CLASS_UID)?;
            let sop_instance_uid = read_str(command, tags::AFFECTED_SOP_INSTANCE_UID)?;
            let obj = InMemDicomObject::read_dataset_with_ts(dataset_bytes, ts)
                .map_err(|e| CoreError::BadFileFormat(format!("could not read C-STORE data set: {e}")))?;
            let meta = FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(&sop_class_uid)
                .media_storage_sop_instance_uid(&sop_instance_uid)
                .transfer_syntax(&ts_uid)
                .build()
                .map_err(|e| CoreError::InternalError(format!("could not build file meta: {e}")))?;
            let mut bytes = Vec::new();
            obj.with_exact_meta(meta)
                .write_all(&mut bytes)
                .map_err(|e| CoreError::InternalError(e.to_string()))?;

            let status_code = match env.ingest(&bytes, Some(calling_aet.to_string())) {
                Ok((public_id, outcome)) => {
                    tracing::info!(calling_aet, %public_id, status = ?outcome, "C-STORE");
                    match outcome {
                        IngestStatus::Success | IngestStatus::AlreadyStored => status::SUCCESS,
                        IngestStatus::AlreadyStoredConflict
                        | IngestStatus::FilteredOut
                        | IngestStatus::StorageFull => status::UNABLE_TO_PROCESS,
                    }
                }
                Err(e) => {
                    tracing::error!(calling_aet, error = %e, "C-STORE failed");
                    status::UNABLE_TO_PROCESS
                }
            };
            send_simple_response(
                association,
                presentation_context_id,
                command_field::C_STORE_RSP,
                message_id,
                status_code,
                Some(&sop_instance_uid),
            )
        }
        command_field::C_FIND_RQ => {
            let abstract_syntax = read_str(command, tags::AFFECTED_SOP_CLASS_UID)?;
            let identifier = InMemDicomObject::read_dataset_with_ts(dataset_bytes, ts)
                .map_err(|e| CoreError::BadFileFormat(format!("could not read C-FIND identifier: {e}")))?;
            run_find(association, env, &identifier, &abstract_syntax, presentation_context_id, message_id, ts)
        }
        command_field::C_MOVE_RQ => {
            let destination_aet = read_str(command, tags::MOVE_DESTINATION)?;
            let identifier = InMemDicomObject::read_dataset_with_ts(dataset_bytes, ts)
                .map_err(|e| CoreError::BadFileFormat(format!("could not read C-MOVE identifier: {e}")))?;
            run_move(association, env, &identifier, &destination_aet, presentation_context_id, message_id)
        }
        other => Err(CoreError::NotImplemented(format!("unsupported command field {other:#06x} with data set"))),
    }
}

/// Resolve a query/retrieve identifier to a [`FinderQuery`]
/// (`spec.md` §4.8 "Query"): one identifier constraint per level-unique tag
/// present and non-wildcard in the identifier.
fn query_from_identifier(identifier: &InMemDicomObject) -> Result<FinderQuery<'static>, CoreError> {
    let level_str = identifier
        .element(tags::QUERY_RETRIEVE_LEVEL)
        .map_err(|_| CoreError::BadRequest("missing QueryRetrieveLevel".to_string()))?
        .to_str()
        .map_err(|_| CoreError::BadRequest("QueryRetrieveLevel is not a string".to_string()))?
        .to_string();
    let target_level = match level_str.trim().to_ascii_uppercase().as_str() {
        "PATIENT" => ResourceLevel::Patient,
        "STUDY" => ResourceLevel::Study,
        "SERIES" => ResourceLevel::Series,
        "INSTANCE" | "IMAGE" => ResourceLevel::Instance,
        other => return Err(CoreError::BadRequest(format!("unknown QueryRetrieveLevel {other}"))),
    };

    let mut tag_constraints = Vec::new();
    let candidates: &[(ResourceLevel, Tag)] = &[
        (ResourceLevel::Patient, tags::PATIENT_ID),
        (ResourceLevel::Study, tags::STUDY_INSTANCE_UID),
        (ResourceLevel::Study, tags::ACCESSION_NUMBER),
        (ResourceLevel::Series, tags::SERIES_INSTANCE_UID),
        (ResourceLevel::Instance, tags::SOP_INSTANCE_UID),
    ];
    for (level, tag) in candidates {
        if *level > target_level {
            continue;
        }
        if let Ok(element) = identifier.element(*tag) {
            if let Ok(value) = element.to_str() {
                let value = value.trim();
                if !value.is_empty() {
                    let matcher = if value.contains('*') || value.contains('?') {
                        Matcher::wildcard(value, true)
                    } else {
                        Matcher::equals(value, true)
                    };
                    tag_constraints.push(TagConstraint {
                        level: *level,
                        tag: (tag.group(), tag.element()),
                        matcher,
                    });
                }
            }
        }
    }

    Ok(FinderQuery {
        target_level,
        tag_constraints,
        instance_predicate: None,
        limit: 10_000,
    })
}

fn run_find(
    association: &mut Association,
    env: &ServerEnvironment,
    identifier: &InMemDicomObject,
    abstract_syntax: &str,
    presentation_context_id: u8,
    message_id: u16,
    ts: &dicom_encoding::TransferSyntax,
) -> Result<(), CoreError> {
    let query = query_from_identifier(identifier)?;
    let target_level = query.target_level;
    let outcome = env.find_resources(&query)?;
    tracing::info!(count = outcome.public_ids.len(), truncated = outcome.truncated, "C-FIND");

    for public_id in &outcome.public_ids {
        let summary = match env.lookup_resource(public_id, target_level)? {
            Some(summary) => summary,
            None => continue,
        };
        let mut response_identifier = InMemDicomObject::new_empty();
        for tag in &summary.main_tags {
            response_identifier.put(DataElement::new(
                Tag(tag.group, tag.element),
                VR::LO,
                PrimitiveValue::from(tag.value.as_str()),
            ));
        }
        let command = find_response_command(abstract_syntax, message_id, status::PENDING);
        send_command_and_dataset(association, presentation_context_id, &command, &response_identifier, ts)?;
    }

    let final_status = if outcome.truncated { status::CANCEL } else { status::SUCCESS };
    send_simple_response(association, presentation_context_id, command_field::C_FIND_RSP, message_id, final_status, None)
}

fn run_move(
    association: &mut Association,
    env: &ServerEnvironment,
    identifier: &InMemDicomObject,
    destination_aet: &str,
    presentation_context_id: u8,
    message_id: u16,
) -> Result<(), CoreError> {
    let query = query_from_identifier(identifier)?;
    let target_level = query.target_level;
    let outcome = env.find_resources(&query)?;
    tracing::info!(count = outcome.public_ids.len(), destination = destination_aet, "C-MOVE");

    let mut completed = 0u16;
    let mut failed = 0u16;
    let remaining_total = outcome.public_ids.len() as u16;

    for public_id in &outcome.public_ids {
        let result = env.send_to_modality(std::slice::from_ref(public_id), destination_aet);
        match result {
            Ok(()) => completed += 1,
            Err(e) => {
                tracing::warn!(error = %e, %public_id, "C-MOVE sub-operation failed");
                failed += 1;
            }
        }
        let remaining = remaining_total.saturating_sub(completed + failed);
        let command = move_response_command(message_id, status::PENDING, remaining, completed, failed);
        send_suboperation_response(association, presentation_context_id, &command)?;
        let _ = target_level;
    }

    let final_status = if failed == 0 { status::SUCCESS } else { status::UNABLE_TO_PROCESS };
    let command = move_response_command(message_id, final_status, 0, completed, failed);
    send_suboperation_response(association, presentation_context_id, &command)
}

fn find_response_command(abstract_syntax: &str, message_id: u16, status_code: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, PrimitiveValue::from(abstract_syntax)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(command_field::C_FIND_RSP)),
        DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            PrimitiveValue::from(if status_code == status::PENDING { 0x0001_u16 } else { 0x0101_u16 }),
        ),
        DataElement::new(tags::STATUS, VR::US, PrimitiveValue::from(status_code)),
    ])
}

fn move_response_command(message_id: u16, status_code: u16, remaining: u16, completed: u16, failed: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(command_field::C_MOVE_RSP)),
        DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(0x0101_u16)),
        DataElement::new(tags::STATUS, VR::US, PrimitiveValue::from(status_code)),
        DataElement::new(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, VR::US, PrimitiveValue::from(remaining)),
        DataElement::new(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, VR::US, PrimitiveValue::from(completed)),
        DataElement::new(tags::NUMBER_OF_FAILED_SUBOPERATIONS, VR::US, PrimitiveValue::from(failed)),
        DataElement::new(tags::NUMBER_OF_WARNING_SUBOPERATIONS, VR::US, PrimitiveValue::from(0_u16)),
    ])
}

fn send_simple_response(
    association: &mut Association,
    presentation_context_id: u8,
    response_command_field: u16,
    message_id: u16,
    status_code: u16,
    sop_instance_uid: Option<&str>,
) -> Result<(), CoreError> {
    let mut elements = vec![
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(response_command_field)),
        DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(0x0101_u16)),
        DataElement::new(tags::STATUS, VR::US, PrimitiveValue::from(status_code)),
    ];
    if let Some(uid) = sop_instance_uid {
        elements.push(DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(uid)));
    }
    let command = InMemDicomObject::command_from_element_iter(elements);
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut bytes, &ts)
        .map_err(|e| CoreError::InternalError(e.to_string()))?;
    association
        .send(&Pdu::PData {
            data: vec![dicom_ul::pdu::PDataValue {
                presentation_context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: bytes,
            }],
        })
        .map_err(|e| CoreError::NetworkProtocol(format!("failed to send response: {e}")))
}

fn send_suboperation_response(
    association: &mut Association,
    presentation_context_id: u8,
    command: &InMemDicomObject,
) -> Result<(), CoreError> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut bytes, &ts)
        .map_err(|e| CoreError::InternalError(e.to_string()))?;
    association
        .send(&Pdu::PData {
            data: vec![dicom_ul::pdu::PDataValue {
                presentation_context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: bytes,
            }],
        })
        .map_err(|e| CoreError::NetworkProtocol(format!("failed to send response: {e}")))
}

fn send_command_and_dataset(
    association: &mut Association,
    presentation_context_id: u8,
    command: &InMemDicomObject,
    dataset: &InMemDicomObject,
    ts: &dicom_encoding::TransferSyntax,
) -> Result<(), CoreError> {
    let implicit = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut command_bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut command_bytes, &implicit)
        .map_err(|e| CoreError::InternalError(e.to_string()))?;
    association
        .send(&Pdu::PData {
            data: vec![dicom_ul::pdu::PDataValue {
                presentation_context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: command_bytes,
            }],
        })
        .map_err(|e| CoreError::NetworkProtocol(format!("failed to send C-FIND-RSP command: {e}")))?;

    let mut dataset_bytes = Vec::new();
    dataset
        .write_dataset_with_ts(&mut dataset_bytes, ts)
        .map_err(|e| CoreError::InternalError(e.to_string()))?;
    association
        .send(&Pdu::PData {
            data: vec![dicom_ul::pdu::PDataValue {
                presentation_context_id,
                value_type: PDataValueType::Data,
                is_last: true,
                data: dataset_bytes,
            }],
        })
        .map_err(|e| CoreError::NetworkProtocol(format!("failed to send C-FIND-RSP identifier: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_from_identifier_resolves_study_level_constraints() {
        let mut identifier = InMemDicomObject::new_empty();
        identifier.put(DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, PrimitiveValue::from("STUDY")));
        identifier.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")));

        let query = query_from_identifier(&identifier).unwrap();
        assert_eq!(query.target_level, ResourceLevel::Study);
        assert_eq!(query.tag_constraints.len(), 1);
        assert_eq!(query.tag_constraints[0].level, ResourceLevel::Study);
    }

    #[test]
    fn query_from_identifier_rejects_unknown_level() {
        let mut identifier = InMemDicomObject::new_empty();
        identifier.put(DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, PrimitiveValue::from("GALAXY")));
        assert!(query_from_identifier(&identifier).is_err());
    }
}
