//! HL7消息构造
//!
//! 生成 ER7 文本（段之间以 `\r` 分隔）。字段值中出现字段分隔符、
//! 段分隔符或MLLP帧标记时视为结构无法满足，返回错误而不是转义。

use radlink_core::utils::{hl7_now, is_valid_control_id};
use radlink_core::{AckCode, PatientDemographics};
use serde::{Deserialize, Serialize};

use crate::hl7::Hl7Error;

const FORBIDDEN: [char; 5] = ['|', '\r', '\n', '\u{0b}', '\u{1c}'];

/// MSH-3..6 收发方标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityConfig {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
}

impl FacilityConfig {
    /// HIS 发往 RIS
    pub fn his() -> Self {
        Self {
            sending_application: "HIS".to_string(),
            sending_facility: "HOSP".to_string(),
            receiving_application: "RIS".to_string(),
            receiving_facility: "RAD".to_string(),
        }
    }

    /// RIS 发往 HIS
    pub fn ris() -> Self {
        Self {
            sending_application: "RIS".to_string(),
            sending_facility: "RAD".to_string(),
            receiving_application: "HIS".to_string(),
            receiving_facility: "HOSP".to_string(),
        }
    }
}

/// 检查申请内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    pub study_name: String,
    pub modality: String,
    pub procedure_code: String, // OBR-4，如 71020^RADIOGRAFIA TORAX^CPT4
    pub item_code: String,      // IPC-5，可为空
    pub ordering_physician: String,
    pub radiologist: String,
}

impl OrderRequest {
    /// 胸部X线平片
    pub fn chest_radiograph(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            study_name: "RADIOGRAFIA TORAX".to_string(),
            modality: "CR".to_string(),
            procedure_code: "71020^RADIOGRAFIA TORAX^CPT4".to_string(),
            item_code: "CR^RADIOGRAFIA^DCM".to_string(),
            ordering_physician: "Dra. Ana Rodríguez".to_string(),
            radiologist: "Dr. Carlos López".to_string(),
        }
    }

    /// 胸部CT平扫
    pub fn chest_ct(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            study_name: "TOMOGRAFIA TORAX".to_string(),
            modality: "CT".to_string(),
            procedure_code: "71250^CT TORAX SIN CONTRASTE^CPT4".to_string(),
            item_code: "CT^TOMOGRAFIA COMPUTARIZADA^DCM".to_string(),
            ordering_physician: "Dra. Ana Rodríguez".to_string(),
            radiologist: "Dr. Carlos López".to_string(),
        }
    }
}

/// 检查报告内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyReport {
    pub study_name: String,
    pub procedure_code: String,
    pub text: String,
    pub radiologist: String,
}

impl StudyReport {
    /// 按检查描述选择报告模板：含 `CT` 为胸部CT，否则为胸部平片
    pub fn for_descriptor(descriptor: &str) -> Self {
        if descriptor.contains("CT") {
            Self {
                study_name: "TOMOGRAFIA TORAX".to_string(),
                procedure_code: "71250^CT TORAX SIN CONTRASTE^CPT4".to_string(),
                text: "Tomografía de tórax: sin hallazgos patológicos.".to_string(),
                radiologist: "Dr. Carlos López".to_string(),
            }
        } else {
            Self {
                study_name: "RADIOGRAFIA TORAX".to_string(),
                procedure_code: "71020^RADIOGRAFIA TORAX^CPT4".to_string(),
                text: "Radiografía de tórax: sin infiltrados ni consolidaciones.".to_string(),
                radiologist: "Dr. Carlos López".to_string(),
            }
        }
    }
}

/// HL7消息构造器
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    facility: FacilityConfig,
}

impl MessageBuilder {
    pub fn new(facility: FacilityConfig) -> Self {
        Self { facility }
    }

    pub fn facility(&self) -> &FacilityConfig {
        &self.facility
    }

    /// ADT^A04 患者登记
    pub fn build_adt_a04(
        &self,
        control_id: &str,
        patient: &PatientDemographics,
    ) -> Result<String, Hl7Error> {
        let segments = vec![
            self.msh("ADT^A04", control_id)?,
            pid(patient)?,
            segment("PV1", &[(2, "I")])?,
        ];
        Ok(segments.join("\r"))
    }

    /// OMI^O23 影像检查申请
    pub fn build_omi_o23(
        &self,
        control_id: &str,
        patient: &PatientDemographics,
        order: &OrderRequest,
    ) -> Result<String, Hl7Error> {
        require("order id", &order.order_id)?;
        require("procedure code", &order.procedure_code)?;

        let mut segments = vec![
            self.msh("OMI^O23", control_id)?,
            pid(patient)?,
            segment(
                "ORC",
                &[
                    (1, "NW"),
                    (2, order.order_id.as_str()),
                    (12, order.ordering_physician.as_str()),
                ],
            )?,
            segment(
                "OBR",
                &[
                    (2, order.order_id.as_str()),
                    (4, order.procedure_code.as_str()),
                    (13, patient.reason.as_str()),
                    (16, order.radiologist.as_str()),
                ],
            )?,
        ];
        if !order.item_code.is_empty() {
            segments.push(segment("IPC", &[(5, order.item_code.as_str())])?);
        }
        Ok(segments.join("\r"))
    }

    /// ORU^R01 检查结果；没有患者信息时省略PID段
    pub fn build_oru_r01(
        &self,
        control_id: &str,
        order_id: &str,
        patient: Option<&PatientDemographics>,
        report: &StudyReport,
    ) -> Result<String, Hl7Error> {
        require("order id", order_id)?;
        require("report text", &report.text)?;

        let reason = patient.map(|p| p.reason.as_str()).unwrap_or_default();
        let mut segments = vec![self.msh("ORU^R01", control_id)?];
        if let Some(patient) = patient {
            segments.push(pid(patient)?);
        }
        segments.push(segment("ORC", &[(2, order_id), (12, report.radiologist.as_str())])?);
        segments.push(segment(
            "OBR",
            &[
                (2, order_id),
                (4, report.procedure_code.as_str()),
                (13, reason),
                (16, report.radiologist.as_str()),
            ],
        )?);
        segments.push(segment(
            "OBX",
            &[
                (1, "1"),
                (2, "TX"),
                (3, report.study_name.as_str()),
                (5, report.text.as_str()),
            ],
        )?);
        Ok(segments.join("\r"))
    }

    /// ACK 确认，MSH-10 为 `ACK` + 原控制ID
    pub fn build_ack(&self, original_control_id: &str, code: &AckCode) -> Result<String, Hl7Error> {
        if !is_valid_control_id(original_control_id) {
            return Err(Hl7Error::Unsatisfiable(format!(
                "invalid control id: {:?}",
                original_control_id
            )));
        }
        require("acknowledgment code", code.as_str())?;

        let control_id = format!("ACK{}", original_control_id);
        let segments = vec![
            self.msh("ACK", &control_id)?,
            segment("MSA", &[(1, code.as_str()), (2, original_control_id)])?,
        ];
        Ok(segments.join("\r"))
    }

    fn msh(&self, message_type: &str, control_id: &str) -> Result<String, Hl7Error> {
        if !is_valid_control_id(control_id) {
            return Err(Hl7Error::Unsatisfiable(format!(
                "invalid control id: {:?}",
                control_id
            )));
        }
        check("sending application", &self.facility.sending_application)?;
        check("sending facility", &self.facility.sending_facility)?;
        check("receiving application", &self.facility.receiving_application)?;
        check("receiving facility", &self.facility.receiving_facility)?;

        Ok(format!(
            "MSH|^~\\&|{}|{}|{}|{}|{}||{}|{}|P|2.5",
            self.facility.sending_application,
            self.facility.sending_facility,
            self.facility.receiving_application,
            self.facility.receiving_facility,
            hl7_now(),
            message_type,
            control_id,
        ))
    }
}

fn pid(patient: &PatientDemographics) -> Result<String, Hl7Error> {
    require("patient id", &patient.patient_id)?;
    let name = format!("{}^{}", patient.family_name, patient.given_name);
    segment(
        "PID",
        &[
            (3, patient.patient_id.as_str()),
            (5, name.as_str()),
            (7, patient.birth_date.as_str()),
            (8, patient.sex.as_str()),
        ],
    )
}

/// 按字段序号拼装段，未给出的字段留空
fn segment(name: &str, values: &[(usize, &str)]) -> Result<String, Hl7Error> {
    let width = values.iter().map(|(index, _)| *index).max().unwrap_or(0);
    let mut fields = vec![""; width + 1];
    fields[0] = name;
    for (index, value) in values {
        check(name, value)?;
        fields[*index] = *value;
    }
    Ok(fields.join("|"))
}

fn check(name: &str, value: &str) -> Result<(), Hl7Error> {
    if value.contains(&FORBIDDEN[..]) {
        return Err(Hl7Error::Unsatisfiable(format!(
            "{} contains a reserved delimiter",
            name
        )));
    }
    Ok(())
}

fn require(name: &str, value: &str) -> Result<(), Hl7Error> {
    if value.trim().is_empty() {
        return Err(Hl7Error::Unsatisfiable(format!("{} is required", name)));
    }
    check(name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hl7::{parse_envelope, MessageKind};

    #[test]
    fn test_build_adt_a04() {
        let builder = MessageBuilder::new(FacilityConfig::his());
        let message = builder
            .build_adt_a04("MSG0001", &PatientDemographics::default())
            .unwrap();

        assert!(message.starts_with("MSH|^~\\&|HIS|HOSP|RIS|RAD|"));
        let envelope = parse_envelope(message.as_bytes()).unwrap();
        assert_eq!(envelope.message_type, "ADT^A04");
        assert_eq!(envelope.control_id, "MSG0001");
        assert_eq!(envelope.kind(), MessageKind::Registration);
        assert_eq!(envelope.field("PID", 5), Some("Pérez García^Juan Antonio"));
        assert_eq!(envelope.field("PV1", 2), Some("I"));
        assert_eq!(envelope.field("MSH", 12), Some("2.5"));
    }

    #[test]
    fn test_build_omi_o23() {
        let builder = MessageBuilder::new(FacilityConfig::his());
        let message = builder
            .build_omi_o23(
                "MSG0002",
                &PatientDemographics::default(),
                &OrderRequest::chest_radiograph("ORD0001"),
            )
            .unwrap();

        let envelope = parse_envelope(message.as_bytes()).unwrap();
        assert_eq!(envelope.kind(), MessageKind::Order);
        assert_eq!(envelope.order_id(), Some("ORD0001"));
        assert_eq!(envelope.field("ORC", 1), Some("NW"));
        assert_eq!(envelope.study_descriptor(), Some("71020^RADIOGRAFIA TORAX^CPT4"));
        assert_eq!(envelope.field("OBR", 13), Some("Tos persistente"));
        assert_eq!(envelope.field("IPC", 5), Some("CR^RADIOGRAFIA^DCM"));
    }

    #[test]
    fn test_build_oru_r01() {
        let builder = MessageBuilder::new(FacilityConfig::ris());
        let report = StudyReport::for_descriptor("71250^CT TORAX SIN CONTRASTE^CPT4");
        let message = builder
            .build_oru_r01("ORU0001", "ORD0002", Some(&PatientDemographics::default()), &report)
            .unwrap();

        let envelope = parse_envelope(message.as_bytes()).unwrap();
        assert_eq!(envelope.kind(), MessageKind::Result);
        assert_eq!(envelope.field("MSH", 3), Some("RIS"));
        assert_eq!(envelope.order_id(), Some("ORD0002"));
        assert_eq!(envelope.field("OBX", 2), Some("TX"));
        assert_eq!(envelope.field("OBX", 3), Some("TOMOGRAFIA TORAX"));
        assert_eq!(
            envelope.field("OBX", 5),
            Some("Tomografía de tórax: sin hallazgos patológicos.")
        );
    }

    #[test]
    fn test_build_oru_without_patient() {
        let builder = MessageBuilder::new(FacilityConfig::ris());
        let report = StudyReport::for_descriptor("71020^RADIOGRAFIA TORAX^CPT4");
        let message = builder
            .build_oru_r01("ORU0002", "ORD0001", None, &report)
            .unwrap();

        let envelope = parse_envelope(message.as_bytes()).unwrap();
        assert!(envelope.segment("PID").is_none());
        assert_eq!(envelope.field("OBX", 3), Some("RADIOGRAFIA TORAX"));
    }

    #[test]
    fn test_build_ack() {
        let builder = MessageBuilder::new(FacilityConfig::ris());
        let message = builder.build_ack("MSG0002", &AckCode::AA).unwrap();

        let envelope = parse_envelope(message.as_bytes()).unwrap();
        assert_eq!(envelope.message_type, "ACK");
        assert_eq!(envelope.control_id, "ACKMSG0002");
        let ack = envelope.acknowledgment().unwrap();
        assert_eq!(ack.acknowledged_control_id, "MSG0002");
        assert!(ack.is_accepted());
    }

    #[test]
    fn test_unsatisfiable_structures() {
        let builder = MessageBuilder::new(FacilityConfig::his());
        let patient = PatientDemographics::default();

        assert!(matches!(
            builder.build_adt_a04("", &patient),
            Err(Hl7Error::Unsatisfiable(_))
        ));
        assert!(matches!(
            builder.build_omi_o23("MSG0002", &patient, &OrderRequest::chest_ct("")),
            Err(Hl7Error::Unsatisfiable(_))
        ));

        let mut bad_patient = patient.clone();
        bad_patient.family_name = "Pérez|García".to_string();
        assert!(matches!(
            builder.build_adt_a04("MSG0001", &bad_patient),
            Err(Hl7Error::Unsatisfiable(_))
        ));

        let mut report = StudyReport::for_descriptor("CR");
        report.text = "line\u{1c}break".to_string();
        assert!(matches!(
            builder.build_oru_r01("ORU0001", "ORD0001", None, &report),
            Err(Hl7Error::Unsatisfiable(_))
        ));
    }

    #[test]
    fn test_ack_accepts_spaced_and_non_ascii_control_ids() {
        let builder = MessageBuilder::new(FacilityConfig::ris());

        for original in ["MSG 0002", "MSGÑ01"] {
            let message = builder.build_ack(original, &AckCode::AA).unwrap();
            let envelope = parse_envelope(message.as_bytes()).unwrap();
            assert_eq!(envelope.control_id, format!("ACK{}", original));
            assert_eq!(
                envelope.acknowledgment().unwrap().acknowledged_control_id,
                original
            );
        }

        assert!(matches!(
            builder.build_ack("MSG|0002", &AckCode::AA),
            Err(Hl7Error::Unsatisfiable(_))
        ));
    }

    #[test]
    fn test_report_template_selection() {
        assert_eq!(
            StudyReport::for_descriptor("71250^CT TORAX SIN CONTRASTE^CPT4").study_name,
            "TOMOGRAFIA TORAX"
        );
        assert_eq!(
            StudyReport::for_descriptor("71020^RADIOGRAFIA TORAX^CPT4").study_name,
            "RADIOGRAFIA TORAX"
        );
    }
}
