//! Shared fixtures for update channel tests.

use std::cell::RefCell;
use std::rc::Rc;

use hotpatch_lib::client::{HmrError, UpdateClient};
use hotpatch_lib::config::ClientConfig;
use hotpatch_lib::fetch::MemorySource;
use hotpatch_lib::types::ModuleId;
use mlua::prelude::*;

/// `app` requires `widget` and accepts its updates; `widget` requires `theme`.
pub const BUNDLE: &str = r#"
  accepted = {}
  registerModules({
    app = function(module, exports, require)
      exports.widget = require("widget")
      module.hot.accept({ "widget" }, function(dep)
        table.insert(accepted, dep)
        exports.widget = require(dep)
      end)
      exports.check = function()
        module.hot.check(function(ok, reason)
          check_result = { ok = ok, reason = reason }
        end)
      end
    end,
    widget = function(module, exports, require)
      exports.version = 1
      exports.theme = require("theme")
    end,
    theme = function(module, exports, require)
      exports.color = "blue"
    end,
  })
"#;

pub type Reloads = Rc<RefCell<Vec<String>>>;

pub type TestClient = UpdateClient<MemorySource, Box<dyn FnMut(&HmrError)>>;

pub fn booted_client(config: &ClientConfig) -> (TestClient, MemorySource, Reloads) {
  let source = MemorySource::new();
  let reloads: Reloads = Rc::default();
  let sink = reloads.clone();
  let reloader: Box<dyn FnMut(&HmrError)> = Box::new(move |err: &HmrError| sink.borrow_mut().push(err.to_string()));

  let mut client = UpdateClient::new(source.clone(), reloader, config).expect("client");
  client.boot(BUNDLE, &ModuleId::new("app")).expect("boot");
  (client, source, reloads)
}

pub fn hot_client() -> (TestClient, MemorySource, Reloads) {
  booted_client(&ClientConfig::default())
}

/// Script of an update unit that delivers `modules` (`(id, factory body)` pairs).
pub fn unit_script(unit: &str, modules: &[(&str, &str)]) -> String {
  let mut script = format!("onUpdateUnitLoaded({:?}, {{\n", unit);
  for (id, body) in modules {
    script.push_str(&format!(
      "  [{:?}] = function(module, exports, require)\n{}\n  end,\n",
      id, body
    ));
  }
  script.push_str("})\n");
  script
}

pub fn manifest(build: &str, units: &[&str]) -> String {
  let changed: Vec<String> = units.iter().map(|unit| format!("{:?}:true", unit)).collect();
  format!(r#"{{"h":{:?},"c":{{{}}}}}"#, build, changed.join(","))
}

/// Value of `exports.version` of the live `widget` record.
pub fn widget_version(client: &TestClient) -> i64 {
  let exports = client.exports(&ModuleId::new("widget")).unwrap().unwrap();
  exports.as_table().unwrap().get("version").unwrap()
}

/// Dependencies `app` has accepted updates for so far, in order.
pub fn accepted(client: &TestClient) -> Vec<String> {
  let accepted: LuaTable = client.runtime().lua().globals().get("accepted").unwrap();
  accepted.sequence_values::<String>().map(Result::unwrap).collect()
}
