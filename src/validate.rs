use crate::elections::{Candidate, ElectionBody};

pub const MIN_ENROLMENT_IMAGES: usize = 2;
pub const MAX_ENROLMENT_IMAGES: usize = 10;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

fn check_candidates(kind: &str, candidates: &[Candidate]) -> Result<(), ValidationError> {
    for (i, c) in candidates.iter().enumerate() {
        if c.name.trim().is_empty() {
            return Err(ValidationError(format!("{kind} candidate #{i} has no name")));
        }
        if c.political_party.trim().is_empty() {
            return Err(ValidationError(format!("{kind} candidate {} has no party", c.name)));
        }
    }
    Ok(())
}

pub fn validate_election(body: &ElectionBody) -> Result<(), ValidationError> {
    let election = &body.elections;
    if election.title.trim().is_empty() {
        return Err(ValidationError("Election title is required".to_string()));
    }
    if election.end_time <= election.start_time {
        return Err(ValidationError("Election must end after it starts".to_string()));
    }
    check_candidates("Presidential", &body.pres_candidates)?;
    check_candidates("Parliamentary", &body.pal_candidates)?;
    Ok(())
}

pub fn validate_enrolment(image_count: usize) -> Result<(), ValidationError> {
    if image_count < MIN_ENROLMENT_IMAGES {
        return Err(ValidationError("Please upload more images".to_string()));
    }
    if image_count > MAX_ENROLMENT_IMAGES {
        return Err(ValidationError(format!(
            "At most {MAX_ENROLMENT_IMAGES} images are accepted"
        )));
    }
    Ok(())
}

/// Wallet addresses are 20-byte hex strings with a `0x` prefix.
pub fn validate_wallet(address: &str) -> Result<(), ValidationError> {
    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| ValidationError(format!("{address} is not a wallet address")))?;
    match hex::decode(digits) {
        Ok(bytes) if bytes.len() == 20 => Ok(()),
        _ => Err(ValidationError(format!("{address} is not a wallet address"))),
    }
}
