use ammonia;

/// Clean grader-supplied HTML using the ammonia library.
///
/// Feedback is rendered inside the learner's review screen, so it goes
/// through a whitelist: formatting tags (like <b>, <p>, <ul>) survive while
/// <script>, <iframe> and event-handler attributes are stripped.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
