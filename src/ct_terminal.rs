// Interactive terminal front end: a menu loop over the controller, with
// queued app events rendered after every action.

use crate::ct_controllers::TransitController;
use crate::ct_events::{drain, AppEvent, Sheet};
use crate::ct_favorites::RouteGroup;
use crate::ct_views::CTViews;
use chrono_tz::Tz;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct CTTerminal<'a> {
    runtime: &'a Runtime,
    controller: TransitController,
    receiver: UnboundedReceiver<AppEvent>,
    time_zone: Tz,
}

impl<'a> CTTerminal<'a> {
    pub fn new(
        runtime: &'a Runtime,
        controller: TransitController,
        receiver: UnboundedReceiver<AppEvent>,
        time_zone: Tz,
    ) -> Self {
        CTTerminal {
            runtime,
            controller,
            receiver,
            time_zone,
        }
    }

    pub fn controller(&self) -> &TransitController {
        &self.controller
    }

    /// Render everything the app asked for since the last call.
    pub fn render_events(&mut self) {
        for event in drain(&mut self.receiver) {
            let state = self.controller.context().store.get();
            match event {
                AppEvent::PresentSheet(sheet) => self.show_sheet(sheet),
                AppEvent::ShowAlert { title, message } => CTViews::show_alert(&title, &message),
                AppEvent::ShowStopCallout(code) => CTViews::show_stop_callout(&state, &code),
            }
        }
    }

    pub fn run(&mut self) {
        CTViews::show_welcome_screen();
        println!("\n🔄 Loading routes...");

        let mut loaded = self.runtime.block_on(self.controller.load_initial_data());
        while loaded.is_err() {
            self.render_events();
            println!("\n💡 Please ensure you have internet access and try again.");
            match CTViews::prompt("➜ Retry? [y/N] ") {
                Some(answer) if answer.eq_ignore_ascii_case("y") => {
                    println!("\n🔄 Loading routes...");
                    loaded = self.runtime.block_on(self.controller.reload_initial_data());
                }
                _ => return,
            }
        }
        self.show_sheet(Sheet::RoutesList);

        loop {
            self.render_events();
            CTViews::show_menu(&self.controller.context().store.get());

            let Some(choice) = CTViews::prompt("") else {
                CTViews::goodbye_message();
                break;
            };
            let has_route = self.controller.context().store.read(|s| s.selected_route.is_some());

            match (choice.as_str(), has_route) {
                ("1", _) => {
                    let _ = self.runtime.block_on(self.controller.load_route_list_preferences());
                    self.show_sheet(Sheet::RoutesList);
                }
                ("2", _) => {
                    let next = match self.controller.context().store.read(|s| s.route_category) {
                        RouteGroup::All => RouteGroup::Favorites,
                        RouteGroup::Favorites => RouteGroup::All,
                    };
                    self.controller.set_route_category(next);
                    self.show_sheet(Sheet::RoutesList);
                }
                ("3", _) => self.open_route(),
                ("4", _) => self.controller.show_alerts(),
                ("5", true) => {
                    if let Some(input) = CTViews::prompt("\n➜ Direction number: ") {
                        match input.parse::<usize>() {
                            Ok(n) if n >= 1 => {
                                self.controller.select_direction(n - 1);
                                self.show_details();
                            }
                            _ => println!("\n✗ Invalid direction '{}'", input),
                        }
                    }
                }
                ("6", true) => {
                    if let Some(code) = CTViews::prompt("\n➜ Stop code: ") {
                        self.controller.select_stop(&code);
                        let _ = self.runtime.block_on(self.controller.load_stop_estimate(&code));
                        self.show_details();
                    }
                }
                ("7", true) => {
                    let _ = self.runtime.block_on(self.controller.refresh_stop_estimates());
                    self.show_details();
                }
                ("8", true) => {
                    let short_name = self
                        .controller
                        .context()
                        .store
                        .read(|s| s.selected_route.as_ref().map(|r| r.short_name.clone()));
                    if let Some(short_name) = short_name {
                        match self.runtime.block_on(self.controller.toggle_favorite(&short_name)) {
                            Ok(true) => println!("\n⭐ Route {} added to favorites", short_name),
                            Ok(false) => println!("\n✓ Route {} removed from favorites", short_name),
                            Err(_) => {}
                        }
                    }
                }
                ("9", true) => self.controller.close_route_details(),
                ("0", _) => {
                    CTViews::goodbye_message();
                    break;
                }
                ("", _) => {}
                (other, _) => println!("\n✗ Invalid option '{}'.", other),
            }
        }
    }

    fn open_route(&mut self) {
        let Some(input) = CTViews::prompt("\n🚌 Route number (e.g. '01', '12'): ") else {
            return;
        };
        match self.controller.find_route(&input) {
            Some(route) => {
                self.controller.select_route(route);
                let _ = self.runtime.block_on(self.controller.load_direction_estimates());
            }
            None => CTViews::invalid_route(&input),
        }
    }

    fn show_sheet(&self, sheet: Sheet) {
        let state = self.controller.context().store.get();
        match sheet {
            Sheet::RoutesList => CTViews::show_routes_list(&state, &self.controller.routes_status()),
            Sheet::RouteDetails => self.show_details(),
            Sheet::Alerts => CTViews::show_alert_list(&state.service_interruptions, &state.routes),
        }
    }

    fn show_details(&self) {
        CTViews::show_route_details(
            &self.controller.context().store.get(),
            &self.controller.estimate_statuses(),
            self.time_zone,
            chrono::Utc::now(),
        );
    }
}
