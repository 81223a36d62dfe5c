//! Grounding context for executor and debugger prompts.
//!
//! Before every code-writing or debugging call, a preamble is assembled from
//! the live project tree so the model anchors on real conventions instead of
//! invented ones: the module path, the sanctioned frameworks, a handful of
//! sample files, and directory listings. The preamble is deterministic for a
//! given tree state; unreadable samples are simply skipped.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Deserialize;

/// Keywords that route a prompt to the mobile preamble.
const MOBILE_KEYWORDS: &[&str] = &[
    "mobile/",
    "expo",
    "react native",
    "react-native",
    "nativewind",
    ".tsx",
    "expo-router",
    "mobile:",
    "mobile app",
    "mobile screen",
    "flatlist",
];

/// Marker appended when a sample file is cut at a head-line budget.
const TRUNCATION_MARKER: &str = "// ... (truncated)";

/// Which half of the project a task targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDomain {
    Backend,
    Mobile,
}

/// Reads sample files and manifests out of the work directory and renders
/// them into prompt preambles.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    work_dir: PathBuf,
}

impl ContextBuilder {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Classify a prompt as backend or mobile work by keyword scan.
    pub fn detect_domain(prompt: &str) -> TaskDomain {
        let lower = prompt.to_lowercase();
        if MOBILE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            TaskDomain::Mobile
        } else {
            TaskDomain::Backend
        }
    }

    /// Full grounding preamble for the executor, selected by domain.
    pub fn preamble(&self, domain: TaskDomain) -> String {
        match domain {
            TaskDomain::Backend => self.backend_preamble(),
            TaskDomain::Mobile => self.mobile_preamble(),
        }
    }

    /// Backend preamble: Go module path, framework constraints, sample
    /// model/service/DTO/handler/routes files, peer listings, conventions.
    pub fn backend_preamble(&self) -> String {
        let mut out = String::new();

        if let Some(module) = self.go_module_path() {
            let _ = write!(
                out,
                "=== GO MODULE PATH (CRITICAL) ===\n\
                 Module: {module}\n\n\
                 ALL internal imports MUST use this exact prefix:\n\
                 \x20 import \"{module}/internal/models\"\n\
                 \x20 import \"{module}/internal/services\"\n\
                 \x20 import \"{module}/internal/dto\"\n\
                 \x20 import \"{module}/internal/handlers\"\n\
                 \x20 import \"{module}/internal/middleware\"\n\
                 \x20 import \"{module}/internal/config\"\n\n\
                 DO NOT use relative paths like \"backend/internal/...\" - they will NOT compile.\n\n"
            );
        }

        out.push_str(
            "=== FRAMEWORK REQUIREMENTS ===\n\
             Backend uses Go-Fiber v2 + GORM (NOT chi, NOT sqlx, NOT gorilla/mux):\n\
             - HTTP: github.com/gofiber/fiber/v2\n\
             - ORM: gorm.io/gorm\n\
             - UUID: github.com/google/uuid\n\
             - JWT: github.com/golang-jwt/jwt/v5\n\n",
        );

        self.push_sample(
            &mut out,
            "backend/internal/models/pet.go",
            "SAMPLE MODEL",
            "Follow this EXACT pattern for new models:",
            None,
        );
        self.push_sample(
            &mut out,
            "backend/internal/services/pet_service.go",
            "SAMPLE SERVICE",
            "Follow this EXACT pattern for new services:",
            None,
        );
        self.push_sample(
            &mut out,
            "backend/internal/dto/pet_dto.go",
            "SAMPLE DTO",
            "Follow this EXACT pattern for new DTOs:",
            None,
        );
        self.push_sample(
            &mut out,
            "backend/internal/handlers/pet_handler.go",
            "SAMPLE HANDLER",
            "Follow this EXACT pattern for new handlers:",
            Some(80),
        );
        self.push_sample(
            &mut out,
            "backend/internal/routes/routes.go",
            "CURRENT ROUTES",
            "Add new routes following this EXACT structure:",
            None,
        );

        out.push_str("=== EXISTING FILES ===\n");
        self.push_listing(&mut out, "backend/internal/models", "Models", &["go"]);
        self.push_listing(&mut out, "backend/internal/services", "Services", &["go"]);
        self.push_listing(&mut out, "backend/internal/handlers", "Handlers", &["go"]);
        self.push_listing(&mut out, "backend/internal/dto", "DTOs", &["go"]);

        out.push_str(
            "\n=== KEY CONVENTIONS ===\n\
             1. UUID primary keys: gorm:\"type:uuid;default:gen_random_uuid();primaryKey\"\n\
             2. Soft delete: gorm.DeletedAt field with gorm:\"index\" tag\n\
             3. Service constructor: func NewXxxService(db *gorm.DB) *XxxService\n\
             4. Handler constructor: func NewXxxHandler(service *services.XxxService) *XxxHandler\n\
             5. Handler methods: func (h *XxxHandler) Create(c *fiber.Ctx) error\n\
             6. Error response: c.Status(fiber.StatusXxx).JSON(fiber.Map{\"error\": true, \"message\": \"...\"})\n\
             7. Get user from JWT: userID := c.Locals(\"userID\").(string) then uuid.Parse(userID)\n\
             8. Parse body: c.BodyParser(&req)\n\
             9. Parse path param: c.Params(\"id\")\n",
        );

        out
    }

    /// Mobile preamble: installed packages, sample layout/API/haptics/screen
    /// files, peer listings, conventions.
    pub fn mobile_preamble(&self) -> String {
        let mut out = String::new();

        out.push_str(
            "=== MOBILE PROJECT CONTEXT ===\n\
             Framework: Expo SDK 54 + React Native 0.81 + NativeWind v4 + Expo Router v6\n\n",
        );

        if let Some(packages) = self.installed_packages() {
            out.push_str("=== INSTALLED PACKAGES (USE ONLY THESE) ===\n");
            out.push_str("DO NOT use any packages not listed here!\n\n");
            out.push_str(&packages);
            out.push_str("\n\n");
        }

        self.push_sample(
            &mut out,
            "mobile/app/(protected)/_layout.tsx",
            "SAMPLE TABS LAYOUT",
            "Follow this EXACT pattern for adding new tabs:",
            None,
        );
        self.push_sample(
            &mut out,
            "mobile/lib/api.ts",
            "API CLIENT",
            "Use this client for all API calls:",
            None,
        );
        self.push_sample(
            &mut out,
            "mobile/lib/haptics.ts",
            "HAPTICS",
            "Import and use ONLY these exact function names:",
            None,
        );
        self.push_sample(
            &mut out,
            "mobile/app/(protected)/home.tsx",
            "SAMPLE SCREEN",
            "Follow this pattern for new screens:",
            Some(60),
        );

        out.push_str("=== EXISTING MOBILE FILES ===\n");
        self.push_listing(
            &mut out,
            "mobile/app/(protected)",
            "Protected Screens",
            &["ts", "tsx"],
        );
        self.push_listing(&mut out, "mobile/lib", "Lib Functions", &["ts", "tsx"]);
        self.push_listing(&mut out, "mobile/components", "Components", &["ts", "tsx"]);

        out.push_str(
            "\n=== KEY CONVENTIONS ===\n\
             1. Use className for styling: <View className=\"flex-1 bg-white p-4\">\n\
             2. Use Ionicons for icons: <Ionicons name=\"home-outline\" size={24} />\n\
             3. API calls: const response = await api.get('/endpoint'); return response.data;\n\
             4. Haptics: hapticSuccess() on success, hapticError() on error, hapticSelection() on tap\n\
             5. Navigation: useRouter() from expo-router, router.push('/path')\n\
             6. Auth check: useAuth() hook returns { isAuthenticated, user }\n\
             7. Loading: <ActivityIndicator size=\"large\" color=\"#2563eb\" />\n\
             8. State: Use useState and useEffect (NOT react-query)\n\
             9. Form state: const [form, setForm] = useState({ field: '' })\n",
        );

        out
    }

    /// Condensed cross-domain context for the debugger: module path,
    /// framework constraints, and brief excerpts of the key sample files.
    pub fn debug_preamble(&self) -> String {
        let mut out = String::new();
        out.push_str("=== CODEBASE CONTEXT FOR ACCURATE FIXES ===\n\n");

        if let Some(module) = self.go_module_path() {
            let _ = write!(
                out,
                "Go Module: {module}\n\
                 Import prefix for internal packages: {module}/internal/...\n\n"
            );
        }

        out.push_str(
            "Framework Requirements:\n\
             - Backend: Go-Fiber v2 + GORM (NOT chi, NOT sqlx, NOT gorilla/mux)\n\
             - Mobile: Expo SDK 54 + React Native 0.81 + NativeWind v4 (NO react-query)\n\n",
        );

        self.push_sample(
            &mut out,
            "backend/internal/services/pet_service.go",
            "SERVICE PATTERN",
            "",
            Some(30),
        );
        self.push_sample(
            &mut out,
            "backend/internal/handlers/pet_handler.go",
            "HANDLER PATTERN",
            "",
            Some(40),
        );
        self.push_sample(&mut out, "mobile/lib/api.ts", "MOBILE API CLIENT", "", Some(30));
        self.push_sample(&mut out, "mobile/lib/haptics.ts", "HAPTICS", "", Some(20));

        out.push_str(
            "=== KEY CONVENTIONS ===\n\
             - Backend services: struct with db *gorm.DB field, New*Service(db) constructor\n\
             - Backend handlers: struct with service field, New*Handler(service) constructor\n\
             - Mobile: Use useState/useEffect (NOT react-query)\n\
             - Mobile haptics: hapticSuccess(), hapticError(), hapticSelection()\n",
        );

        out
    }

    /// Extract the module path from `backend/go.mod`.
    fn go_module_path(&self) -> Option<String> {
        let content = std::fs::read_to_string(self.work_dir.join("backend/go.mod")).ok()?;
        content.lines().find_map(|line| {
            line.trim()
                .strip_prefix("module ")
                .map(|m| m.trim().to_string())
        })
    }

    /// Render dependency lists from `mobile/package.json`.
    fn installed_packages(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct PackageManifest {
            #[serde(default)]
            dependencies: std::collections::BTreeMap<String, String>,
            #[serde(default, rename = "devDependencies")]
            dev_dependencies: std::collections::BTreeMap<String, String>,
        }

        let raw = std::fs::read_to_string(self.work_dir.join("mobile/package.json")).ok()?;
        let manifest: PackageManifest = serde_json::from_str(&raw).ok()?;

        let mut out = String::from("Dependencies:\n");
        for (name, version) in &manifest.dependencies {
            let _ = writeln!(out, "  - {name}: {version}");
        }
        if !manifest.dev_dependencies.is_empty() {
            out.push_str("\nDevDependencies:\n");
            for (name, version) in &manifest.dev_dependencies {
                let _ = writeln!(out, "  - {name}: {version}");
            }
        }
        Some(out)
    }

    /// Append one sample file section, optionally truncated to `head_lines`.
    fn push_sample(
        &self,
        out: &mut String,
        relative: &str,
        label: &str,
        instruction: &str,
        head_lines: Option<usize>,
    ) {
        let Some(content) = self.read_sample(relative, head_lines) else {
            return;
        };
        let _ = write!(out, "=== {label} ({relative}) ===\n");
        if !instruction.is_empty() {
            out.push_str(instruction);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&content);
        out.push_str("\n\n");
    }

    /// Read a sample file, cutting at `head_lines` with a marker when set.
    fn read_sample(&self, relative: &str, head_lines: Option<usize>) -> Option<String> {
        let content = std::fs::read_to_string(self.work_dir.join(relative)).ok()?;
        match head_lines {
            Some(max) => {
                let lines: Vec<&str> = content.lines().collect();
                if lines.len() > max {
                    let mut head = lines[..max].join("\n");
                    head.push('\n');
                    head.push_str(TRUNCATION_MARKER);
                    Some(head)
                } else {
                    Some(content)
                }
            }
            None => Some(content),
        }
    }

    /// Append a basename listing of `relative`, filtered by extension.
    fn push_listing(&self, out: &mut String, relative: &str, label: &str, extensions: &[&str]) {
        let Ok(entries) = std::fs::read_dir(self.work_dir.join(relative)) else {
            return;
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| extensions.iter().any(|ext| name.ends_with(&format!(".{ext}"))))
            .collect();
        names.sort();

        let _ = writeln!(out, "{label}:");
        for name in names {
            let _ = writeln!(out, "  - {name}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("backend/internal/models")).unwrap();
        std::fs::create_dir_all(dir.path().join("backend/internal/services")).unwrap();
        std::fs::create_dir_all(dir.path().join("mobile/lib")).unwrap();
        std::fs::write(
            dir.path().join("backend/go.mod"),
            "module github.com/acme/petstack\n\ngo 1.22\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("backend/internal/models/pet.go"),
            "package models\n\ntype Pet struct{}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("backend/internal/models/owner.go"),
            "package models\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("mobile/package.json"),
            r#"{"dependencies":{"expo":"~54.0.0","axios":"^1.7.0"}}"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn domain_detection_routes_mobile_keywords() {
        assert_eq!(
            ContextBuilder::detect_domain("Add a screen under mobile/app"),
            TaskDomain::Mobile
        );
        assert_eq!(
            ContextBuilder::detect_domain("Build with Expo Router"),
            TaskDomain::Mobile
        );
        assert_eq!(
            ContextBuilder::detect_domain("Add a REST endpoint for pets"),
            TaskDomain::Backend
        );
    }

    #[test]
    fn backend_preamble_contains_module_and_samples() {
        let dir = project();
        let builder = ContextBuilder::new(dir.path());
        let preamble = builder.backend_preamble();

        assert!(preamble.contains("Module: github.com/acme/petstack"));
        assert!(preamble.contains("import \"github.com/acme/petstack/internal/models\""));
        assert!(preamble.contains("type Pet struct{}"));
        assert!(preamble.contains("- owner.go"));
        assert!(preamble.contains("- pet.go"));
        assert!(preamble.contains("KEY CONVENTIONS"));
    }

    #[test]
    fn mobile_preamble_lists_installed_packages() {
        let dir = project();
        let builder = ContextBuilder::new(dir.path());
        let preamble = builder.mobile_preamble();

        assert!(preamble.contains("INSTALLED PACKAGES"));
        assert!(preamble.contains("- expo: ~54.0.0"));
        assert!(preamble.contains("- axios: ^1.7.0"));
    }

    #[test]
    fn missing_samples_are_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ContextBuilder::new(dir.path());
        let preamble = builder.backend_preamble();

        assert!(!preamble.contains("SAMPLE MODEL"));
        assert!(preamble.contains("FRAMEWORK REQUIREMENTS"));
    }

    #[test]
    fn long_samples_are_head_truncated_with_marker() {
        let dir = project();
        let body: String = (0..200).map(|i| format!("line {i}\n")).collect();
        std::fs::create_dir_all(dir.path().join("backend/internal/handlers")).unwrap();
        std::fs::write(
            dir.path().join("backend/internal/handlers/pet_handler.go"),
            &body,
        )
        .unwrap();

        let builder = ContextBuilder::new(dir.path());
        let preamble = builder.backend_preamble();
        assert!(preamble.contains("line 79"));
        assert!(!preamble.contains("line 80\n"));
        assert!(preamble.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn preamble_is_deterministic_for_a_tree_state() {
        let dir = project();
        let builder = ContextBuilder::new(dir.path());
        assert_eq!(builder.backend_preamble(), builder.backend_preamble());
        assert_eq!(builder.mobile_preamble(), builder.mobile_preamble());
    }
}
