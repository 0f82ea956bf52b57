use anyhow::{anyhow, Result};
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use std::sync::OnceLock;
use unic_langid::LanguageIdentifier;

/// Language used when the user's Telegram language is unknown or unsupported
pub const DEFAULT_LANGUAGE: &str = "ru";

const RESOURCES: [(&str, &str); 2] = [
    ("ru", include_str!("../locales/ru/main.ftl")),
    ("en", include_str!("../locales/en/main.ftl")),
];

/// Localization manager for the textbook bot
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a new localization manager with every bundled language loaded
    pub fn new() -> Result<Self> {
        let mut bundles = HashMap::new();

        for (language, source) in RESOURCES {
            let locale: LanguageIdentifier = language.parse()?;
            let bundle = Self::create_bundle(&locale, source)?;
            bundles.insert(language.to_string(), bundle);
        }

        Ok(Self { bundles })
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(
        locale: &LanguageIdentifier,
        source: &str,
    ) -> Result<FluentBundle<FluentResource>> {
        let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
        // Telegram renders the Unicode isolation marks literally
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid {} resource: {:?}", locale, errors))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Duplicate {} messages: {:?}", locale, errors))?;

        Ok(bundle)
    }

    /// Get a localized message in a specific language, falling back to Russian
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let bundle = match self
            .bundles
            .get(detect_language(Some(language)))
            .or_else(|| self.bundles.get(DEFAULT_LANGUAGE))
        {
            Some(bundle) => bundle,
            None => return format!("Missing translation: {}", key),
        };

        let msg = match bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {}", key),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {}", key),
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (name, value) in args {
                fluent_args.set(*name, FluentValue::from(*value));
            }
            fluent_args
        });

        let mut errors = vec![];
        bundle
            .format_pattern(pattern, fluent_args.as_ref(), &mut errors)
            .into_owned()
    }

    /// Get a localized message with simple string arguments
    pub fn get_message_with_args(&self, key: &str, language: &str, args: &[(&str, &str)]) -> String {
        let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
        self.get_message_in_language(key, language, Some(&args_map))
    }
}

/// Global localization instance
static LOCALIZATION_MANAGER: OnceLock<LocalizationManager> = OnceLock::new();

/// Initialize the global localization manager
pub fn init_localization() -> Result<()> {
    if LOCALIZATION_MANAGER.get().is_none() {
        let manager = LocalizationManager::new()?;
        let _ = LOCALIZATION_MANAGER.set(manager);
    }
    Ok(())
}

/// Get the global localization manager, loading it on first use
fn localization_manager() -> Option<&'static LocalizationManager> {
    if let Some(manager) = LOCALIZATION_MANAGER.get() {
        return Some(manager);
    }
    match LocalizationManager::new() {
        Ok(manager) => Some(LOCALIZATION_MANAGER.get_or_init(|| manager)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load localization resources");
            None
        }
    }
}

/// Map a Telegram language code onto a supported language
pub fn detect_language(language_code: Option<&str>) -> &'static str {
    let primary = language_code
        .and_then(|code| code.split(['-', '_']).next())
        .map(|code| code.trim().to_ascii_lowercase());

    match primary.as_deref() {
        Some("en") => "en",
        _ => DEFAULT_LANGUAGE,
    }
}

/// Localized message in the user's language
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    match localization_manager() {
        Some(manager) => {
            manager.get_message_in_language(key, detect_language(language_code), None)
        }
        None => key.to_string(),
    }
}

/// Localized message with arguments in the user's language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    match localization_manager() {
        Some(manager) => {
            manager.get_message_with_args(key, detect_language(language_code), args)
        }
        None => key.to_string(),
    }
}
