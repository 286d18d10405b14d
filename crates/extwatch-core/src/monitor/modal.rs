use super::{Monitor, MonitorContext, MonitorFamily};
use crate::host::{install_wrapper, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{CreateElement, HostApi};
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Modal;

/// Watches element creation for `div.modal`.
pub struct ModalMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl ModalMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }
}

impl Monitor for ModalMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.document.create_element, move |original| {
                Rc::new(move |spec: CreateElement| {
                    let is_div = spec.tag_name.eq_ignore_ascii_case("div");
                    let origin = is_div
                        .then(|| ctx.attribute_caller("createElement"))
                        .flatten();
                    let element = original(spec);
                    if is_div && element.has_class("modal") {
                        ctx.observe_as(FAMILY, "createElement", origin, |ctx, origin| {
                            let draft = ObservationDraft::new(Category::Modal, origin, "modal-created")
                                .with("tagName", element.node_name.as_str())
                                .with("className", element.class_name())
                                .with("id", element.id.as_str());
                            ctx.record(draft)
                        });
                    }
                    element
                })
            }));
        debug!(target: "extwatch::monitor", monitor = self.name(), "monitor installed");
    }

    fn restore(&mut self) {
        let restored = self.restores.restore_all();
        debug!(target: "extwatch::monitor", monitor = self.name(), restored, "monitor restored");
    }

    fn is_installed(&self) -> bool {
        !self.restores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::context;
    use crate::settings::WatcherSettings;

    fn create(tag: &str, class: &str) -> CreateElement {
        CreateElement {
            tag_name: tag.to_string(),
            class_name: Some(class.to_string()),
            id: Some("quick-switch".to_string()),
        }
    }

    #[test]
    fn only_modal_divs_are_logged() {
        let host = HostApi::new(0);
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let mut monitor = ModalMonitor::new(ctx);
        monitor.initialize(&host);

        let element = host.run_as("omnisearch", || {
            host.document.create_element.call(create("DIV", "modal mod-wide"));
            host.document.create_element.call(create("span", "modal"));
            host.document.create_element.call(create("div", "modal-bg"))
        });
        assert_eq!(element.node_name, "DIV");

        assert_eq!(sink.actions(), vec!["modal-created"]);
        let draft = sink.last();
        assert_eq!(draft.detail_str("className"), Some("modal mod-wide"));
        assert_eq!(draft.detail_str("tagName"), Some("DIV"));
        assert_eq!(draft.detail_str("id"), Some("quick-switch"));
    }
}
