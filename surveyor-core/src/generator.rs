use crate::ai::{self, AiContext, ContextPage, LlmClient};
use crate::error::{CoreError, GenerationError, Result};
use crate::model::{DiscoveredApi, StoredForm, StoredPage, TestType};
use crate::templates::{
    LOAD_CONCURRENCY, api_tests, count_tests, form_tests, load_tests, page_tests, security_tests,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CUSTOM_CATEGORY: &str = "custom";
pub const CONFIG_FILE: &str = "playwright.config.js";

/// Runner configuration written next to the specs. Plain object, so it
/// loads without resolving any package.
const RUNNER_CONFIG: &str = "module.exports = {
  testDir: '.',
  testMatch: '*.spec.js',
  timeout: 120000,
  retries: 0,
  use: {
    headless: true,
    ignoreHTTPSErrors: true,
    screenshot: 'only-on-failure',
    trace: 'off',
  },
};
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub category: String,
    pub path: PathBuf,
    pub tests: usize,
}

/// What one run asks the generator for.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub base_url: String,
    pub test_types: Vec<TestType>,
    pub pages: Vec<StoredPage>,
    pub apis: Vec<DiscoveredApi>,
    pub forms: Vec<StoredForm>,
    pub auth_headers: BTreeMap<String, String>,
    pub ai_prompt: Option<String>,
    pub ai_only: bool,
    /// Pages seen just before generation; replace the stored pages in the
    /// model context when present.
    pub scouted: Vec<ContextPage>,
}

impl GenerationRequest {
    fn prompt(&self) -> Option<&str> {
        self.ai_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    fn ai_context(&self) -> AiContext {
        let pages = if self.scouted.is_empty() {
            self.pages.iter().cloned().map(ContextPage::from).collect()
        } else {
            self.scouted.clone()
        };
        AiContext {
            base_url: self.base_url.clone(),
            pages,
            apis: self.apis.clone(),
            forms: self.forms.clone(),
            auth_headers: self.auth_headers.clone(),
        }
    }
}

/// Writes spec files for a run into a directory it owns.
pub struct TestGenerator {
    out_dir: PathBuf,
    llm: Option<Arc<dyn LlmClient>>,
    max_tokens: u32,
    ai_timeout: Duration,
}

impl TestGenerator {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            llm: None,
            max_tokens: 3000,
            ai_timeout: Duration::from_secs(55),
        }
    }

    pub fn with_llm(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(client);
        self
    }

    pub fn with_ai_limits(mut self, max_tokens: u32, timeout: Duration) -> Self {
        self.max_tokens = max_tokens;
        self.ai_timeout = timeout;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn reset_out_dir(&self) -> Result<()> {
        if self.out_dir.exists() {
            fs::remove_dir_all(&self.out_dir)?;
        }
        fs::create_dir_all(&self.out_dir)?;
        fs::write(self.out_dir.join(CONFIG_FILE), RUNNER_CONFIG)?;
        Ok(())
    }

    fn write(&self, category: &str, code: String, files: &mut Vec<GeneratedFile>) -> Result<()> {
        let path = self.out_dir.join(format!("{}.spec.js", category));
        fs::write(&path, &code)?;
        let tests = count_tests(&code);
        debug!("Wrote {} ({} tests)", path.display(), tests);
        files.push(GeneratedFile {
            category: category.to_string(),
            path,
            tests,
        });
        Ok(())
    }

    /// Clear the output directory and write one spec per category that has
    /// something to test. In AI-only mode the standard templates are skipped
    /// and a failed AI generation fails the call; otherwise it is logged.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedFile>> {
        self.reset_out_dir()?;
        let mut files = Vec::new();

        if request.ai_only {
            info!("AI-only mode, skipping standard test generation");
        } else {
            for test_type in &request.test_types {
                let code = match test_type {
                    TestType::Pages => page_tests(&request.pages),
                    TestType::Apis => api_tests(&request.apis, &request.auth_headers),
                    TestType::Forms => form_tests(&request.forms),
                    TestType::Security => {
                        security_tests(&request.pages, &request.apis, &request.base_url)
                    }
                    TestType::Load => load_tests(&request.pages, &request.apis, LOAD_CONCURRENCY),
                };
                if let Some(code) = code {
                    self.write(test_type.as_str(), code, &mut files)?;
                }
            }
        }

        if let Some(prompt) = request.prompt() {
            match self.generate_ai(prompt, request).await {
                Ok(code) => self.write(CUSTOM_CATEGORY, code, &mut files)?,
                Err(e) if request.ai_only => return Err(CoreError::Generation(e)),
                Err(e) => warn!("AI test generation failed, continuing with standard tests: {}", e),
            }
        }

        info!(
            "Generated test files: {} ({} files)",
            files
                .iter()
                .map(|f| f.category.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            files.len()
        );
        Ok(files)
    }

    async fn generate_ai(
        &self,
        prompt: &str,
        request: &GenerationRequest,
    ) -> std::result::Result<String, GenerationError> {
        let client = self.llm.as_ref().ok_or(GenerationError::MissingApiKey)?;
        let preview: String = prompt.chars().take(80).collect();
        info!("Generating AI tests from prompt: \"{}\"", preview);
        ai::generate_ai_tests(
            client.as_ref(),
            prompt,
            &request.ai_context(),
            self.max_tokens,
            self.ai_timeout,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use surveyor_scanner::UiSnapshot;
    use tempfile::TempDir;

    struct Fixed(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl LlmClient for Fixed {
        async fn complete(&self, _: &str, _: &str, _: u32) -> std::result::Result<String, GenerationError> {
            self.0
                .map(str::to_string)
                .map_err(|_| GenerationError::Request("connection refused".into()))
        }
    }

    const PLAN: &str = r#"[{"name": "Home shows title", "steps": [{"action": "goto", "path": "/"},
        {"action": "assert_visible", "text": "Home"}]}]"#;

    fn request(types: &[TestType]) -> GenerationRequest {
        let page = |url: &str| StoredPage {
            url: url.into(),
            title: "Home".into(),
            status_code: 200,
            response_time_ms: 5,
            has_forms: false,
            is_auth_page: false,
            ui_elements: UiSnapshot::default(),
        };
        GenerationRequest {
            base_url: "http://a.test".into(),
            test_types: types.to_vec(),
            pages: vec![page("http://a.test/"), page("http://a.test/about")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_writes_only_categories_with_content() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("generated");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.spec.js"), "old").unwrap();

        let generator = TestGenerator::new(&out);
        let files = generator
            .generate(&request(&[
                TestType::Pages,
                TestType::Apis,
                TestType::Security,
                TestType::Load,
            ]))
            .await
            .unwrap();

        let written: Vec<(&str, usize)> = files.iter().map(|f| (f.category.as_str(), f.tests)).collect();
        assert_eq!(written, vec![("pages", 2), ("security", 1), ("load", 2)]);
        assert!(out.join("security.spec.js").exists());
        assert!(out.join("load.spec.js").exists());
        assert!(!out.join("apis.spec.js").exists());
        assert!(!out.join("stale.spec.js").exists());
        assert!(out.join(CONFIG_FILE).exists());
    }

    #[tokio::test]
    async fn test_ai_failure_is_logged_unless_ai_only() {
        let dir = TempDir::new().unwrap();
        let generator =
            TestGenerator::new(dir.path().join("g")).with_llm(Arc::new(Fixed(Err(()))));

        let mut req = request(&[TestType::Pages]);
        req.ai_prompt = Some("test the homepage".into());
        let files = generator.generate(&req).await.unwrap();
        assert_eq!(files.len(), 1);

        req.ai_only = true;
        let err = generator.generate(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::Generation(GenerationError::Request(_))));
    }

    #[tokio::test]
    async fn test_ai_only_writes_custom_spec() {
        let dir = TempDir::new().unwrap();
        let generator = TestGenerator::new(dir.path().join("g")).with_llm(Arc::new(Fixed(Ok(PLAN))));

        let mut req = request(&[TestType::Pages]);
        req.ai_prompt = Some("check the homepage".into());
        req.ai_only = true;
        let files = generator.generate(&req).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].category, CUSTOM_CATEGORY);
        assert_eq!(files[0].tests, 1);
        assert!(files[0].path.ends_with("custom.spec.js"));
    }

    #[tokio::test]
    async fn test_prompt_without_client_is_missing_key() {
        let dir = TempDir::new().unwrap();
        let generator = TestGenerator::new(dir.path().join("g"));
        let mut req = request(&[]);
        req.ai_prompt = Some("anything".into());
        req.ai_only = true;
        let err = generator.generate(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::Generation(GenerationError::MissingApiKey)));
    }
}
