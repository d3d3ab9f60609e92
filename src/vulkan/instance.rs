use ash::{ext::debug_utils, vk, Entry, Instance};
use log::{debug, info, warn};
use std::ffi::{c_char, CStr};

use crate::{AshError, Result};

/// Vulkan instance wrapper that owns the loader entry, the instance and the
/// optional validation messenger. No surface extensions are requested; the
/// lifecycle core renders offscreen.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug_utils: Option<debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    pub fn new(enable_validation: bool) -> Result<Self> {
        unsafe {
            let entry = Entry::load().map_err(|e| {
                AshError::DeviceInitFailed(format!("Failed to load Vulkan entry: {e:?}"))
            })?;

            let validation_layers = if enable_validation {
                Self::query_validation_layers(&entry)?
            } else {
                Vec::new()
            };
            // Debug utils only make sense when the layer actually loaded.
            let enable_validation = enable_validation && !validation_layers.is_empty();

            let extensions = if enable_validation {
                vec![debug_utils::NAME.as_ptr()]
            } else {
                Vec::new()
            };

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Ash Lifecycle")
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(c"Ash Lifecycle")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let mut create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_extension_names(&extensions)
                .enabled_layer_names(&validation_layers);

            let mut debug_create_info =
                enable_validation.then_some(Self::debug_messenger_create_info());
            if let Some(ref mut info) = debug_create_info {
                create_info = create_info.push_next(info);
            }

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                AshError::DeviceInitFailed(format!("Failed to create Vulkan instance: {e:?}"))
            })?;

            let debug_utils_loader =
                enable_validation.then(|| debug_utils::Instance::new(&entry, &instance));

            let debug_messenger = match debug_utils_loader {
                Some(ref utils) => {
                    let create_info = Self::debug_messenger_create_info();
                    match utils.create_debug_utils_messenger(&create_info, None) {
                        Ok(messenger) => Some(messenger),
                        Err(e) => {
                            instance.destroy_instance(None);
                            return Err(AshError::DeviceInitFailed(format!(
                                "Failed to create debug messenger: {e:?}"
                            )));
                        }
                    }
                }
                None => None,
            };

            info!(
                "Vulkan instance created (validation: {})",
                debug_messenger.is_some()
            );

            Ok(Self {
                entry,
                instance,
                debug_utils: debug_utils_loader,
                debug_messenger,
            })
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Whether the debug utils extension is enabled on this instance.
    pub fn has_debug_utils(&self) -> bool {
        self.debug_utils.is_some()
    }

    fn query_validation_layers(entry: &Entry) -> Result<Vec<*const c_char>> {
        unsafe {
            let available_layers = entry.enumerate_instance_layer_properties().map_err(|e| {
                AshError::DeviceInitFailed(format!(
                    "Failed to enumerate instance layer properties: {e:?}"
                ))
            })?;

            let desired = [c"VK_LAYER_KHRONOS_validation".as_ptr()];
            let mut enabled = Vec::new();

            for &layer_name in &desired {
                let desired_name = CStr::from_ptr(layer_name);
                let found = available_layers
                    .iter()
                    .any(|layer| CStr::from_ptr(layer.layer_name.as_ptr()) == desired_name);

                if found {
                    enabled.push(layer_name);
                } else {
                    warn!("Validation layer {desired_name:?} not available");
                }
            }

            Ok(enabled)
        }
    }

    fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if !callback_data.is_null() && !(*callback_data).p_message.is_null() {
        CStr::from_ptr((*callback_data).p_message)
            .to_string_lossy()
            .into_owned()
    } else {
        String::from("<null>")
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        warn!(target: "vulkan", "[{message_types:?}] {message}");
    } else {
        debug!(
            target: "vulkan",
            "[{message_types:?}][{message_severity:?}] {message}"
        );
    }

    vk::FALSE
}
