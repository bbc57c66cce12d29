use crate::error::ApiError;

/// Maximum scene text length submitted to a provider
const MAX_TEXT_LENGTH: usize = 5000;
/// Maximum story id length
const MAX_STORY_ID_LENGTH: usize = 64;
/// Scene numbers are 1-based and bounded
const MAX_SCENE_NUMBER: u32 = 10_000;

/// Validate the (story, scene) addressing of a request
pub fn validate_scene_request(story_id: &str, scene_number: u32) -> Result<(), ApiError> {
    if story_id.is_empty() {
        return Err(ApiError::InvalidInput("Story id cannot be empty".to_string()));
    }
    if story_id.len() > MAX_STORY_ID_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Story id too long (max {} characters)",
            MAX_STORY_ID_LENGTH
        )));
    }
    if !is_valid_story_id(story_id) {
        return Err(ApiError::InvalidInput(format!(
            "Invalid story id format: {}. Expected letters, digits, '-' or '_'",
            story_id
        )));
    }
    if scene_number == 0 {
        return Err(ApiError::InvalidInput(
            "Scene numbers start at 1".to_string(),
        ));
    }
    if scene_number > MAX_SCENE_NUMBER {
        return Err(ApiError::InvalidInput(format!(
            "Scene number too large (max {})",
            MAX_SCENE_NUMBER
        )));
    }

    Ok(())
}

/// Validate scene text before it is handed to a provider
pub fn validate_scene_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput(
            "Scene text cannot be empty".to_string(),
        ));
    }
    if text.len() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Scene text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    Ok(())
}

fn is_valid_story_id(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
