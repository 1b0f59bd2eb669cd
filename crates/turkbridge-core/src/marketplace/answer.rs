use quick_xml::Reader;
use quick_xml::events::Event;

use crate::models::{AnswerField, CoreError, CoreErrorKind};

const SELECTION_DELIMITER: &str = "|";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AnswerElement {
    QuestionIdentifier,
    FreeText,
    SelectionIdentifier,
    OtherSelectionText,
    UploadedFileKey,
}

impl AnswerElement {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"QuestionIdentifier" => Some(Self::QuestionIdentifier),
            b"FreeText" => Some(Self::FreeText),
            b"SelectionIdentifier" => Some(Self::SelectionIdentifier),
            b"OtherSelectionText" => Some(Self::OtherSelectionText),
            b"UploadedFileKey" => Some(Self::UploadedFileKey),
            _ => None,
        }
    }
}

#[derive(Default)]
struct PartialAnswer {
    question_identifier: Option<String>,
    free_text: Option<String>,
    selections: Vec<String>,
    other_selection: Option<String>,
    uploaded_file_key: Option<String>,
}

impl PartialAnswer {
    fn open(&mut self, element: AnswerElement) {
        match element {
            AnswerElement::QuestionIdentifier => {
                self.question_identifier.get_or_insert_with(String::new);
            }
            AnswerElement::FreeText => {
                self.free_text.get_or_insert_with(String::new);
            }
            AnswerElement::SelectionIdentifier => self.selections.push(String::new()),
            AnswerElement::OtherSelectionText => {
                self.other_selection.get_or_insert_with(String::new);
            }
            AnswerElement::UploadedFileKey => {
                self.uploaded_file_key.get_or_insert_with(String::new);
            }
        }
    }

    fn append(&mut self, element: AnswerElement, text: &str) {
        let slot = match element {
            AnswerElement::QuestionIdentifier => self.question_identifier.as_mut(),
            AnswerElement::FreeText => self.free_text.as_mut(),
            AnswerElement::SelectionIdentifier => self.selections.last_mut(),
            AnswerElement::OtherSelectionText => self.other_selection.as_mut(),
            AnswerElement::UploadedFileKey => self.uploaded_file_key.as_mut(),
        };
        if let Some(slot) = slot {
            slot.push_str(text);
        }
    }

    fn finish(self) -> Result<AnswerField, CoreError> {
        let question_identifier = self
            .question_identifier
            .filter(|identifier| !identifier.trim().is_empty())
            .ok_or_else(|| extraction_error("answer is missing its QuestionIdentifier"))?;

        let value = if let Some(free_text) = self.free_text {
            free_text
        } else if !self.selections.is_empty() || self.other_selection.is_some() {
            let mut parts = self.selections;
            parts.extend(self.other_selection);
            parts.join(SELECTION_DELIMITER)
        } else if let Some(file_key) = self.uploaded_file_key {
            file_key
        } else {
            return Err(extraction_error(format!(
                "answer '{question_identifier}' carries no value"
            )));
        };

        Ok(AnswerField {
            question_identifier,
            value,
        })
    }
}

/// Parses a QuestionFormAnswers document into its answers, in document
/// order. Selection answers join their identifiers with `|`.
pub fn parse_answer_payload(payload: &str) -> Result<Vec<AnswerField>, CoreError> {
    let mut reader = Reader::from_str(payload);

    let mut saw_root = false;
    let mut answers = Vec::new();
    let mut current: Option<PartialAnswer> = None;
    let mut element: Option<AnswerElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => match start.local_name().as_ref() {
                b"QuestionFormAnswers" => saw_root = true,
                b"Answer" => current = Some(PartialAnswer::default()),
                name => {
                    element = AnswerElement::from_local_name(name);
                    if let (Some(answer), Some(opened)) = (current.as_mut(), element) {
                        answer.open(opened);
                    }
                }
            },
            Ok(Event::Empty(empty)) => {
                if let (Some(answer), Some(opened)) = (
                    current.as_mut(),
                    AnswerElement::from_local_name(empty.local_name().as_ref()),
                ) {
                    answer.open(opened);
                }
            }
            Ok(Event::Text(text)) => {
                if let (Some(answer), Some(open)) = (current.as_mut(), element) {
                    let unescaped = text.unescape().map_err(|error| {
                        extraction_error(format!("answer text is not valid XML text: {error}"))
                    })?;
                    answer.append(open, &unescaped);
                }
            }
            Ok(Event::CData(data)) => {
                if let (Some(answer), Some(open)) = (current.as_mut(), element) {
                    answer.append(open, &String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::End(end)) => {
                if end.local_name().as_ref() == b"Answer" {
                    if let Some(answer) = current.take() {
                        answers.push(answer.finish()?);
                    }
                }
                element = None;
            }
            Ok(Event::Eof) => break,
            Err(error) => {
                return Err(extraction_error(format!(
                    "malformed answer payload at byte {}: {error}",
                    reader.error_position()
                )));
            }
            Ok(_) => {}
        }
    }

    if current.is_some() {
        return Err(extraction_error("answer payload ends inside an <Answer>"));
    }
    if !saw_root {
        return Err(extraction_error(
            "answer payload has no QuestionFormAnswers element",
        ));
    }
    if answers.is_empty() {
        return Err(extraction_error("answer payload contains no answers"));
    }
    Ok(answers)
}

/// Only the first answer field is ever used; single-answer questions are the
/// supported shape and any further fields are ignored.
pub fn first_answer_value(payload: &str) -> Result<String, CoreError> {
    parse_answer_payload(payload)?
        .into_iter()
        .next()
        .map(|answer| answer.value)
        .ok_or_else(|| extraction_error("answer payload contains no answers"))
}

fn extraction_error(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::AnswerExtraction, message)
}
